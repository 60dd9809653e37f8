//! Preference and external source commands.

use super::{PrefsAction, SourcesAction, json_or_string, print_json};
use switchboard::ServiceContainer;

/// Prefs command.
pub fn cmd_prefs(
    services: &ServiceContainer,
    action: PrefsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = services.store();
    match action {
        PrefsAction::Set {
            key,
            value,
            category,
        } => {
            store.set_preference(&key, json_or_string(&value), &category)?;
            print_json(&store.get_preference(&key)?)
        },
        PrefsAction::Get { key } => print_json(&store.get_preference(&key)?),
        PrefsAction::List { category } => {
            print_json(&store.get_all_preferences(category.as_deref())?)
        },
    }
}

/// Sources command.
pub fn cmd_sources(
    services: &ServiceContainer,
    action: SourcesAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = services.store();
    match action {
        SourcesAction::Add {
            source_type,
            content,
            url,
            analysis,
        } => {
            let id = store.store_external_source(
                &source_type,
                url.as_deref(),
                json_or_string(&content),
                analysis.as_deref().map(json_or_string),
            )?;
            print_json(&serde_json::json!({ "id": id }))
        },
        SourcesAction::List { source_type } => {
            print_json(&store.external_sources(source_type.as_deref())?)
        },
    }
}
