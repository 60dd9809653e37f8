//! Memory record commands.

use super::{json_or_string, parse_tags, print_json};
use switchboard::{MemoryId, MemoryQuery, ServiceContainer};

/// Remember command.
pub fn cmd_remember(
    services: &ServiceContainer,
    category: &str,
    content: &str,
    tags: Option<String>,
    source: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = services.store_memory(
        category,
        json_or_string(content),
        parse_tags(tags.as_deref()),
        source,
    )?;
    print_json(&serde_json::json!({ "id": id }))
}

/// Recall command.
pub fn cmd_recall(services: &ServiceContainer, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record = services.recall(&MemoryId::new(id.trim()))?;
    print_json(&record)
}

/// Query command.
pub fn cmd_query(
    services: &ServiceContainer,
    category: Option<String>,
    tags: Option<String>,
    source: Option<String>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut query = MemoryQuery::new(limit);
    query.category = category;
    query.tags = parse_tags(tags.as_deref());
    query.source = source;

    print_json(&services.query(&query)?)
}

/// Reindex command.
pub fn cmd_reindex(services: &ServiceContainer) -> Result<(), Box<dyn std::error::Error>> {
    let indexed = services.store().rebuild_indexes()?;
    print_json(&serde_json::json!({ "indexed": indexed }))
}

/// Rotate command.
pub fn cmd_rotate(
    services: &ServiceContainer,
    days: u32,
    category: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = services
        .store()
        .rotate(chrono::Duration::days(i64::from(days)), category)?;
    print_json(&serde_json::json!({ "removed": removed, "older_than_days": days }))
}
