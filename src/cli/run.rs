//! Command dispatch for the weft CLI.

use std::collections::HashMap;
use std::path::Path;
use std::{env, fs};

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;

use super::ExitStatus;
use super::args::{Arguments, CheckCommand, Command, CommonArgs, GetCommand, KeysCommand, SetCommand};
use crate::config::{CONFIG_FILE_NAME, default_config_json, find_config_file, load_config};
use crate::core::document::{Document, GetOptions, Options};
use crate::core::expr::parser::parse_template;
use crate::core::path as dotted;
use crate::core::variant::{ParsedKey, Qualifier};

pub async fn run(Arguments { command }: Arguments) -> Result<ExitStatus> {
    match command {
        Some(Command::Get(cmd)) => get(cmd).await,
        Some(Command::Set(cmd)) => set(cmd).await,
        Some(Command::Keys(cmd)) => keys(cmd),
        Some(Command::Check(cmd)) => check(cmd),
        Some(Command::Init) => init(),
        None => {
            anyhow::bail!("No command provided. Use --help to see available commands.")
        }
    }
}

/// Build engine options from the nearest config file, then adopt the
/// document named by the common args.
fn load_document(common: &CommonArgs) -> Result<Document> {
    let start_dir = common
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_default();
    let options = match find_config_file(&start_dir) {
        Some(config_path) => load_config(&config_path)?.into_options(),
        None => Options::default(),
    };
    let source = fs::read_to_string(&common.file)
        .with_context(|| format!("Failed to read document: {:?}", common.file))?;
    Ok(Document::parse(&source, options)?)
}

async fn get(cmd: GetCommand) -> Result<ExitStatus> {
    let doc = load_document(&cmd.common)?;
    let context = cmd.common.variant_context()?;
    let opts = GetOptions {
        fresh: cmd.fresh,
        context: (!context.is_empty()).then_some(context),
    };
    let value = doc.get_with(&cmd.path, opts).await?;
    match value {
        Value::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(ExitStatus::Success)
}

async fn set(cmd: SetCommand) -> Result<ExitStatus> {
    let doc = load_document(&cmd.common)?;
    // JSON when it parses, a plain string otherwise.
    let value: Value = serde_json::from_str(&cmd.value)
        .unwrap_or_else(|_| Value::String(cmd.value.clone()));
    doc.set(&cmd.path, value)?;

    let mut content = serde_json::to_string_pretty(&doc.snapshot())?;
    content.push('\n');
    fs::write(&cmd.common.file, content)
        .with_context(|| format!("Failed to write document: {:?}", cmd.common.file))?;
    println!("{} {}", "updated".green().bold(), cmd.path);
    Ok(ExitStatus::Success)
}

fn keys(cmd: KeysCommand) -> Result<ExitStatus> {
    let doc = load_document(&cmd.common)?;
    let node = match &cmd.path {
        Some(path) => doc.node(path),
        None => doc.root(),
    };
    for key in node.keys() {
        println!("{key}");
    }
    Ok(ExitStatus::Success)
}

fn init() -> Result<ExitStatus> {
    let config_path = Path::new(CONFIG_FILE_NAME);
    if config_path.exists() {
        anyhow::bail!("{} already exists", CONFIG_FILE_NAME);
    }
    fs::write(config_path, default_config_json()?)?;
    println!("{} {}", "created".green().bold(), CONFIG_FILE_NAME);
    Ok(ExitStatus::Success)
}

struct CheckReport {
    issues: Vec<(String, String)>,
    expressions: usize,
}

/// Parse every expression key and flag conflicting or ambiguous variant
/// declarations, without evaluating anything.
fn check(cmd: CheckCommand) -> Result<ExitStatus> {
    let source = fs::read_to_string(&cmd.common.file)
        .with_context(|| format!("Failed to read document: {:?}", cmd.common.file))?;
    let schema: Value = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse document: {:?}", cmd.common.file))?;

    let mut report = CheckReport {
        issues: Vec::new(),
        expressions: 0,
    };
    match schema.as_object() {
        Some(map) => check_object(map, "", &mut report),
        None => report
            .issues
            .push((String::new(), "schema root must be an object".to_string())),
    }

    for (path, message) in &report.issues {
        let location = if path.is_empty() { "<root>" } else { path };
        println!("{} {}: {}", "error:".red().bold(), location.bold(), message);
    }
    if report.issues.is_empty() {
        println!(
            "{} {} expression key(s) checked, no issues found.",
            "ok:".green().bold(),
            report.expressions
        );
        Ok(ExitStatus::Success)
    } else {
        println!(
            "{} issue(s) in {} expression key(s).",
            report.issues.len(),
            report.expressions
        );
        Ok(ExitStatus::Failure)
    }
}

fn check_object(map: &serde_json::Map<String, Value>, prefix: &str, report: &mut CheckReport) {
    let mut seen: HashMap<(String, Vec<Qualifier>), [bool; 2]> = HashMap::new();
    for (key, value) in map {
        let parsed = ParsedKey::parse(key);
        let key_path = dotted::join(prefix, parsed.storage_name());
        if parsed.base.is_empty() {
            report.issues.push((key_path, "empty key name".to_string()));
            continue;
        }
        let flags = seen
            .entry((parsed.base.to_string(), parsed.qualifier_signature()))
            .or_default();
        let slot = usize::from(parsed.is_expression);
        if flags[slot] {
            report.issues.push((
                key_path.clone(),
                "ambiguous duplicate variant declaration".to_string(),
            ));
        }
        flags[slot] = true;
        if flags[0] && flags[1] {
            report.issues.push((
                key_path.clone(),
                "static and expression forms of the same key".to_string(),
            ));
        }
        if parsed.is_expression {
            match value.as_str() {
                Some(template) => {
                    report.expressions += 1;
                    if let Err(err) = parse_template(template) {
                        report.issues.push((key_path, err.to_string()));
                    }
                }
                None => report.issues.push((
                    key_path,
                    "expression key must hold a template string".to_string(),
                )),
            }
        } else {
            check_value(value, &dotted::join(prefix, parsed.base), report);
        }
    }
}

fn check_value(value: &Value, prefix: &str, report: &mut CheckReport) {
    match value {
        Value::Object(map) => check_object(map, prefix, report),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                check_value(item, &dotted::join(prefix, &index.to_string()), report);
            }
        }
        _ => {}
    }
}
