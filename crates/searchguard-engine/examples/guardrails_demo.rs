//! Guardrails Engine Demo
//!
//! Walks through the validation pipeline: blocked commands, limit
//! clamping, concurrency admission, and data masking.
//!
//! Run with:
//! ```bash
//! cargo run -p searchguard-engine --example guardrails_demo
//! ```

use searchguard_engine::*;
use serde_json::json;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let store = PolicyStore::from_config(PolicyConfig::default())?;
    let engine = GuardrailsEngine::new(store)?;

    let alice = UserContext::new("alice", vec!["standard_user".to_string()]);

    println!("=== Example 1: Blocked command ===");
    let verdict = engine.validate_search("| delete index=main", &alice)?;
    println!("blocked: {}", verdict.blocked);
    for violation in &verdict.violations {
        println!("  violation: {}", violation);
    }

    println!("\n=== Example 2: Clean query with limit clamping ===");
    let verdict = engine.validate_search("index=main | stats count by host", &alice)?;
    println!("blocked: {}", verdict.blocked);
    println!("dispatched query: {}", verdict.modified_query);
    for modification in &verdict.modifications_applied {
        println!("  modification: {}", modification);
    }
    engine.release_search(&alice.username);

    println!("\n=== Example 3: Concurrency ceiling ===");
    let query = "index=main earliest=-4h | head 5";
    for attempt in 1..=4 {
        let verdict = engine.validate_search(query, &alice)?;
        println!("attempt {}: allowed = {}", attempt, verdict.allowed());
    }
    for _ in 0..3 {
        engine.release_search(&alice.username);
    }

    println!("\n=== Example 4: Data masking ===");
    let records = vec![Record::from_iter([
        ("username".to_string(), json!("alice")),
        ("password".to_string(), json!("hunter2")),
        ("ssn".to_string(), json!("123-45-6789")),
    ])];
    let masked = engine.apply_data_masking(records, &alice)?;
    println!("{}", serde_json::to_string_pretty(&masked)?);

    println!("\n=== Example 5: Audit trail ===");
    for entry in engine.audit_log().entries() {
        println!("{} {} by {}", entry.timestamp, entry.action, entry.username);
    }

    Ok(())
}
