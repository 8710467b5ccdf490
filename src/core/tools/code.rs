//! Top-level code definition extraction via language-aware regexes.
//!
//! Fast and deliberately shallow: one pass over the file with a handful of
//! anchored patterns per language. Good enough for the model to orient
//! itself in an unfamiliar file without a full parser.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::core::error::{CoreError, CoreResult};
use crate::core::guard::{display_relative, resolve_in_repo};
use crate::core::tools::file::decode_permissive;
use crate::core::tools::{ParamType, Tool, ToolContext, ToolParameter, ToolSpec};

struct LangPattern {
    kind: &'static str,
    regex: Regex,
}

struct Language {
    name: &'static str,
    patterns: Vec<LangPattern>,
}

fn pattern(kind: &'static str, re: &str) -> LangPattern {
    LangPattern {
        kind,
        regex: Regex::new(re).expect("static definition regex"),
    }
}

fn language_for(ext: &str) -> Option<&'static Language> {
    static LANGS: OnceLock<Vec<(Vec<&'static str>, Language)>> = OnceLock::new();
    let langs = LANGS.get_or_init(|| {
        vec![
            (
                vec!["py"],
                Language {
                    name: "python",
                    patterns: vec![
                        pattern("class", r"^class\s+(\w+)"),
                        pattern("function", r"^(?:async\s+)?def\s+(\w+)"),
                        pattern("method", r"^\s+(?:async\s+)?def\s+(\w+)"),
                    ],
                },
            ),
            (
                vec!["js", "jsx"],
                Language {
                    name: "javascript",
                    patterns: vec![
                        pattern("class", r"^(?:export\s+)?(?:default\s+)?class\s+(\w+)"),
                        pattern(
                            "function",
                            r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
                        ),
                        pattern(
                            "function",
                            r"^(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::\s*[\w<>\[\], ]+)?\s*=>",
                        ),
                    ],
                },
            ),
            (
                vec!["ts", "tsx"],
                Language {
                    name: "typescript",
                    patterns: vec![
                        pattern("class", r"^(?:export\s+)?(?:abstract\s+)?class\s+(\w+)"),
                        pattern("interface", r"^(?:export\s+)?interface\s+(\w+)"),
                        pattern(
                            "function",
                            r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
                        ),
                        pattern(
                            "function",
                            r"^(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::\s*[\w<>\[\], ]+)?\s*=>",
                        ),
                    ],
                },
            ),
            (
                vec!["java"],
                Language {
                    name: "java",
                    patterns: vec![
                        pattern(
                            "class",
                            r"^\s*(?:public\s+|private\s+|protected\s+|abstract\s+|final\s+|static\s+)*(?:class|interface|enum)\s+(\w+)",
                        ),
                        pattern(
                            "method",
                            r"^\s+(?:public|private|protected)\s+(?:static\s+|final\s+|abstract\s+|synchronized\s+)*[\w<>\[\], ]+\s+(\w+)\s*\(",
                        ),
                    ],
                },
            ),
            (
                vec!["c", "h"],
                Language {
                    name: "c",
                    patterns: vec![
                        pattern("struct", r"^(?:typedef\s+)?struct\s+(\w+)"),
                        pattern(
                            "function",
                            r"^(?:static\s+|inline\s+|extern\s+)*[\w\*]+[\s\*]+(\w+)\s*\([^;]*$",
                        ),
                    ],
                },
            ),
            (
                vec!["cpp", "cc", "hpp", "cxx"],
                Language {
                    name: "cpp",
                    patterns: vec![
                        pattern("class", r"^(?:template\s*<[^>]*>\s*)?class\s+(\w+)"),
                        pattern("struct", r"^(?:typedef\s+)?struct\s+(\w+)"),
                        pattern(
                            "function",
                            r"^(?:static\s+|inline\s+|virtual\s+)*[\w:<>&\*]+[\s\*&]+(\w+)\s*\([^;]*$",
                        ),
                    ],
                },
            ),
            (
                vec!["go"],
                Language {
                    name: "go",
                    patterns: vec![
                        pattern("type", r"^type\s+(\w+)\s+(?:struct|interface)"),
                        pattern("method", r"^func\s+\([^)]+\)\s+(\w+)"),
                        pattern("function", r"^func\s+(\w+)"),
                    ],
                },
            ),
        ]
    });
    langs
        .iter()
        .find(|(exts, _)| exts.contains(&ext))
        .map(|(_, lang)| lang)
}

pub struct ListCodeDefinitionsTool;

#[async_trait]
impl Tool for ListCodeDefinitionsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_code_definitions".into(),
            description: "List top-level class, function, and method names in a source file. \
                          Supports Python, JavaScript, TypeScript, Java, C, C++, and Go."
                .into(),
            parameters: vec![ToolParameter::required(
                "file_path",
                ParamType::String,
                "Path of the source file to analyze, relative to the repository root",
            )],
        }
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn execute(&self, params: &Value, ctx: &ToolContext) -> CoreResult<Value> {
        let file_path = params["file_path"].as_str().unwrap_or_default();
        let path = resolve_in_repo(&ctx.repo_root, file_path)?;
        if !path.is_file() {
            return Err(CoreError::not_found(format!(
                "file '{file_path}' does not exist"
            )));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let bytes = tokio::fs::read(&path).await?;
        let (content, _) = decode_permissive(&bytes);

        let (language, definitions) = match language_for(&ext) {
            Some(lang) => {
                let mut defs = Vec::new();
                for (idx, line) in content.lines().enumerate() {
                    for p in &lang.patterns {
                        if let Some(caps) = p.regex.captures(line) {
                            if let Some(name) = caps.get(1) {
                                defs.push(json!({
                                    "kind": p.kind,
                                    "name": name.as_str(),
                                    "line": idx + 1,
                                }));
                                break;
                            }
                        }
                    }
                }
                (lang.name, defs)
            }
            None => ("unknown", Vec::new()),
        };

        let total_count = definitions.len();
        Ok(json!({
            "file_path": display_relative(&ctx.repo_root, &path),
            "language": language,
            "definitions": definitions,
            "total_count": total_count,
        }))
    }
}
