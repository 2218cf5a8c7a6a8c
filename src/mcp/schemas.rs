use rust_mcp_schema::ToolInputSchema;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

type Prop = Map<String, Value>;

// Helper to create a JSON schema property
fn create_prop(type_str: &str, description: &str) -> Prop {
    let mut prop = Map::new();
    prop.insert("type".to_string(), json!(type_str));
    prop.insert("description".to_string(), json!(description));
    prop
}

fn callback_prop(description: &str) -> Prop {
    let mut prop = create_prop("object", description);
    prop.insert(
        "properties".to_string(),
        json!({
            "program": {
                "type": "string",
                "description": "Callback program name, echoed back in each notification."
            },
            "arguments": {
                "type": "array",
                "description": "Fixed leading arguments. The delivered line (or null on exit) is appended after them."
            }
        }),
    );
    prop.insert("required".to_string(), json!(["program"]));
    prop
}

fn object_schema(properties: Vec<(&str, Prop)>, required: &[&str]) -> ToolInputSchema {
    let properties: HashMap<String, Prop> = properties
        .into_iter()
        .map(|(name, prop)| (name.to_string(), prop))
        .collect();
    ToolInputSchema::new(
        required.iter().map(|r| r.to_string()).collect(),
        Some(properties),
        None,
    )
}

const NAME_DESCRIPTION: &str = "Caller-chosen terminal name. Unique among live terminals.";

pub fn empty_schema() -> ToolInputSchema {
    ToolInputSchema::new(vec![], None, None)
}

pub fn terminal_create_schema() -> ToolInputSchema {
    object_schema(
        vec![
            ("name", create_prop("string", NAME_DESCRIPTION)),
            (
                "working_folder",
                create_prop("string", "Working folder, relative to FILES_ROOT or absolute. Defaults to FILES_ROOT."),
            ),
            (
                "on_output",
                callback_prop("Callback invoked for every non-empty stdout line, and once with null when the shell exits."),
            ),
            ("on_error", callback_prop("Callback invoked for every non-empty stderr line.")),
        ],
        &["name"],
    )
}

pub fn terminal_write_schema() -> ToolInputSchema {
    object_schema(
        vec![
            ("name", create_prop("string", NAME_DESCRIPTION)),
            (
                "command",
                create_prop("string", "Command line sent to the shell's stdin. A line terminator is appended."),
            ),
        ],
        &["name", "command"],
    )
}

pub fn terminal_destroy_schema() -> ToolInputSchema {
    object_schema(vec![("name", create_prop("string", NAME_DESCRIPTION))], &["name"])
}

pub fn process_execute_schema() -> ToolInputSchema {
    object_schema(
        vec![
            (
                "command_line",
                create_prop("string", "Program followed by its arguments. Not interpreted by a shell."),
            ),
            (
                "timeout_ms",
                create_prop("integer", "Optional deadline; the process is killed when it passes."),
            ),
        ],
        &["command_line"],
    )
}

pub fn os_matches_platform_schema() -> ToolInputSchema {
    object_schema(
        vec![(
            "platform",
            create_prop("string", "Platform name such as windows, linux, osx, freebsd or unix."),
        )],
        &["platform"],
    )
}
