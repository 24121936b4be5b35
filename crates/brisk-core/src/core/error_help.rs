use crate::core::BriskError;

/// Provides helpful suggestions for common errors
pub trait ErrorHelp {
    fn help(&self) -> Option<String>;
}

impl ErrorHelp for BriskError {
    fn help(&self) -> Option<String> {
        match self {
            BriskError::Resolution {
                specifier,
                candidates,
                ..
            } => {
                let mut help = if specifier.starts_with('.') || specifier.starts_with('/') {
                    "💡 Suggestion: Check the import path and file extension".to_string()
                } else {
                    format!(
                        "💡 Suggestion: Install '{}' into node_modules, or mark it as external in brisk.yaml",
                        specifier
                    )
                };
                if !candidates.is_empty() {
                    help.push_str("\n   Tried:");
                    for candidate in candidates.iter().take(8) {
                        help.push_str(&format!("\n   - {}", candidate.display()));
                    }
                }
                Some(help)
            }
            BriskError::Transform { hook, .. } => {
                if hook.starts_with("plugin:") {
                    Some(
                        "💡 Suggestion: The failing hook belongs to a plugin. Check the plugin's filter and its input"
                            .to_string(),
                    )
                } else {
                    Some("💡 Suggestion: Check the file for syntax errors".to_string())
                }
            }
            BriskError::Plugin { plugin, .. } => Some(format!(
                "💡 Suggestion: Disable plugin '{}' to confirm it is the cause",
                plugin
            )),
            BriskError::Chunking(_) => Some(
                "💡 This is an internal bundler bug. Please report it with your brisk.yaml".to_string(),
            ),
            BriskError::Config(msg) => {
                if msg.contains("brisk.yaml not found") {
                    Some(
                        "💡 Suggestion: Create a brisk.yaml in your project root, or pass --config <path>"
                            .to_string(),
                    )
                } else {
                    None
                }
            }
            BriskError::Server(msg) if msg.contains("Failed to bind") => {
                Some("💡 Suggestion: Another process may own the port. Set dev.port in brisk.yaml or pass --port".to_string())
            }
            BriskError::Yaml(e) => Some(format!(
                "💡 Suggestion: Check your YAML syntax. Common issues:\n  - Missing colons after keys\n  - Incorrect indentation\n  - Unclosed quotes\n\nError details: {}",
                e
            )),
            BriskError::Io(e) => {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    Some(
                        "💡 Suggestion: Check file permissions, or try running with appropriate permissions"
                            .to_string(),
                    )
                } else if e.kind() == std::io::ErrorKind::NotFound {
                    Some(
                        "💡 Suggestion: The file or directory may not exist. Check the path and try again"
                            .to_string(),
                    )
                } else if e.kind() == std::io::ErrorKind::AddrInUse {
                    Some("💡 Suggestion: The port is taken. Set dev.port in brisk.yaml or pass --port".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Format an error with helpful suggestions
pub fn format_error_with_help(error: &BriskError) -> String {
    let mut output = format!("❌ Error: {}", error);

    if let Some(help) = error.help() {
        output.push_str("\n\n");
        output.push_str(&help);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_help_bare_specifier() {
        let error = BriskError::Resolution {
            importer: PathBuf::from("/app/index.js"),
            specifier: "left-pad".to_string(),
            candidates: vec![],
        };
        assert!(error.help().unwrap().contains("external"));
    }

    #[test]
    fn test_error_help_lists_candidates() {
        let error = BriskError::Resolution {
            importer: PathBuf::from("/app/index.js"),
            specifier: "./missing".to_string(),
            candidates: vec![PathBuf::from("/app/missing.ts")],
        };
        let formatted = format_error_with_help(&error);
        assert!(formatted.contains("/app/missing.ts"));
    }
}
