use serde_json::{json, Value};

/// Closed set of tools the sandbox can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ExecuteCommand,
    ReadFile,
    WriteToFile,
    ReplaceInFile,
    ListFiles,
    SearchFiles,
}

const TOOL_NAMES: [(ToolKind, &str); 6] = [
    (ToolKind::ExecuteCommand, "execute_command"),
    (ToolKind::ReadFile, "read_file"),
    (ToolKind::WriteToFile, "write_to_file"),
    (ToolKind::ReplaceInFile, "replace_in_file"),
    (ToolKind::ListFiles, "list_files"),
    (ToolKind::SearchFiles, "search_files"),
];

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::ExecuteCommand,
        ToolKind::ReadFile,
        ToolKind::WriteToFile,
        ToolKind::ReplaceInFile,
        ToolKind::ListFiles,
        ToolKind::SearchFiles,
    ];

    pub fn name(self) -> &'static str {
        TOOL_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TOOL_NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(kind, _)| *kind)
    }

    /// OpenAI function-tool definition for this tool.
    pub fn schema(self) -> Value {
        let (description, parameters) = match self {
            Self::ExecuteCommand => (
                "Run a command in the task directory. The command is tokenized with shell quoting rules and executed without a shell.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Command line to execute."},
                        "requires_approval": {"type": "boolean", "description": "Whether the command has side effects that need approval."}
                    },
                    "required": ["command"]
                }),
            ),
            Self::ReadFile => (
                "Read a text file relative to the task directory.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path to read."}
                    },
                    "required": ["path"]
                }),
            ),
            Self::WriteToFile => (
                "Create or overwrite a file with the given content. Parent directories are created.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path to write."},
                        "content": {"type": "string", "description": "Complete file content."}
                    },
                    "required": ["path", "content"]
                }),
            ),
            Self::ReplaceInFile => (
                "Edit a file with SEARCH/REPLACE blocks. Blocks apply in order and each replaces the first occurrence of its search text.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path to edit."},
                        "diff": {
                            "type": "string",
                            "description": "One or more blocks of the form:\n<<<<<<< SEARCH\n[exact content]\n=======\n[new content]\n>>>>>>> REPLACE"
                        }
                    },
                    "required": ["path", "diff"]
                }),
            ),
            Self::ListFiles => (
                "List directory entries, 100 per page.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Directory to list."},
                        "recursive": {"type": "boolean", "description": "Walk subdirectories."},
                        "block": {"type": "integer", "description": "1-based page number."}
                    },
                    "required": ["path"]
                }),
            ),
            Self::SearchFiles => (
                "Search files under a directory with a regular expression and return matches with surrounding context.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Directory to search."},
                        "regex": {"type": "string", "description": "Regular expression to match."},
                        "file_pattern": {"type": "string", "description": "Glob filter such as *.py."}
                    },
                    "required": ["path", "regex"]
                }),
            ),
        };

        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": description,
                "parameters": parameters,
            }
        })
    }
}

/// Schemas for every tool, in declaration order.
pub fn all_schemas() -> Vec<Value> {
    ToolKind::ALL.iter().map(|kind| kind.schema()).collect()
}

#[cfg(test)]
mod tests {
    use super::{all_schemas, ToolKind};

    #[test]
    fn names_round_trip_through_the_table() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("delete_everything"), None);
    }

    #[test]
    fn schemas_carry_function_names() {
        let names: Vec<String> = all_schemas()
            .iter()
            .map(|schema| schema["function"]["name"].as_str().unwrap_or_default().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "execute_command",
                "read_file",
                "write_to_file",
                "replace_in_file",
                "list_files",
                "search_files"
            ]
        );
    }
}
