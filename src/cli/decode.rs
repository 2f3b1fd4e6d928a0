//! `jd-decoder decode`: one-shot decode of a file or stdin.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use jd_decoder::{Config, Decoder, ExtractionResult};

use super::OutputFormat;

pub(crate) async fn cmd_decode(
    file: Option<PathBuf>,
    api_key: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let api_key = api_key
        .filter(|k| !k.trim().is_empty())
        .context("No API key: pass --api-key or set GEMINI_API_KEY")?;
    let document = read_document(file.as_deref())?;

    let config = Config::load().with_context(|| "Failed to load configuration")?;
    let decoder = Decoder::from_config(&config).with_context(|| "Failed to build decoder")?;

    let result = decoder
        .decode(&api_key, &document)
        .await
        .with_context(|| "Failed to decode job description")?;

    println!("{}", render(&result, format)?);
    Ok(())
}

fn read_document(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read job description from {}", p.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read job description from stdin")?;
            Ok(buf)
        }
    }
}

fn render(result: &ExtractionResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(result).context("Failed to serialize result")
        }
        OutputFormat::Text => Ok(render_text(result)),
    }
}

fn render_text(result: &ExtractionResult) -> String {
    let sections = [
        ("Must have", &result.must_have),
        ("Nice to have", &result.nice_to_have),
        ("Keywords", &result.keywords),
        ("Insights", &result.insights),
    ];

    let mut out = String::new();
    for (title, items) in sections {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(title);
        out.push_str(":\n");
        if items.is_empty() {
            out.push_str("  (none)\n");
        }
        for item in items {
            out.push_str("  - ");
            out.push_str(item);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ExtractionResult {
        ExtractionResult {
            must_have: vec!["Go".into(), "Kubernetes".into()],
            nice_to_have: vec![],
            keywords: vec!["Go".into()],
            insights: vec!["On-call rotation".into()],
        }
    }

    #[test]
    fn test_read_document_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jd.txt");
        std::fs::write(&path, "Senior Go Engineer").unwrap();
        assert_eq!(read_document(Some(&path)).unwrap(), "Senior Go Engineer");
    }

    #[test]
    fn test_read_document_missing_file_has_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.txt");
        let err = read_document(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_render_json_uses_camel_case() {
        let json = render(&sample(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mustHave"][1], "Kubernetes");
        assert_eq!(value["niceToHave"], serde_json::json!([]));
    }

    #[test]
    fn test_render_text_sections() {
        let text = render_text(&sample());
        assert!(text.starts_with("Must have:\n  - Go\n  - Kubernetes\n"));
        assert!(text.contains("Nice to have:\n  (none)\n"));
        assert!(text.contains("Insights:\n  - On-call rotation\n"));
    }
}
