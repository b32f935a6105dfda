//! Upstream block rendering.
//!
//! # Output
//! ```text
//! upstream web {
//!     server [10.0.0.1]:8080;
//!     server [::1]:9090 backup;
//! }
//!
//! upstream api {
//!     server [::1]:9090 backup;
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::upstream::endpoint::{Application, RegistrationSet};

/// Fallback server appended to every block.
pub const DEFAULT_FALLBACK: &str = "[::1]:9090";

const INDENT: &str = "    ";

/// Rendered configuration for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamBlock {
    application: String,
    text: String,
}

impl UpstreamBlock {
    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// The full rendered document, compared and persisted as one unit.
///
/// Surrounding whitespace is never significant, so it is trimmed on
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveConfiguration(String);

impl EffectiveConfiguration {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(text.as_ref().trim().to_string())
    }

    /// Join blocks in the given order, one blank line apart.
    pub fn from_blocks(blocks: &[UpstreamBlock]) -> Self {
        let joined = blocks
            .iter()
            .map(UpstreamBlock::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
        Self::new(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recover the per-application blocks of a previously rendered document.
    ///
    /// Text outside `upstream <name> { ... }` blocks is ignored, as is an
    /// unterminated trailing block.
    pub fn blocks(&self) -> HashMap<String, UpstreamBlock> {
        let mut found = HashMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in self.0.lines() {
            match current.as_mut() {
                Some((name, lines)) => {
                    lines.push(line);
                    if line.trim_end() == "}" {
                        let block = UpstreamBlock {
                            application: name.clone(),
                            text: lines.join("\n"),
                        };
                        found.insert(name.clone(), block);
                        current = None;
                    }
                }
                None => {
                    if let Some(name) = block_header(line) {
                        current = Some((name.to_string(), vec![line]));
                    }
                }
            }
        }

        found
    }
}

impl fmt::Display for EffectiveConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn block_header(line: &str) -> Option<&str> {
    let name = line.strip_prefix("upstream ")?.strip_suffix(" {")?;
    (!name.is_empty() && !name.contains(char::is_whitespace)).then_some(name)
}

/// Renders registration sets into upstream blocks.
#[derive(Debug, Clone)]
pub struct Renderer {
    fallback: String,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK)
    }
}

impl Renderer {
    /// Create a renderer using `fallback` as the backup server address.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
        }
    }

    /// Render one application's block.
    ///
    /// The backup line is always present and always last, so an empty set
    /// still yields a valid block.
    pub fn render(&self, application: &Application, regs: &RegistrationSet) -> UpstreamBlock {
        let mut text = format!("upstream {} {{\n", application.name);
        for endpoint in regs {
            text.push_str(&format!("{INDENT}server {endpoint};\n"));
        }
        text.push_str(&format!("{INDENT}server {} backup;\n}}", self.fallback));

        UpstreamBlock {
            application: application.name.clone(),
            text,
        }
    }
}
