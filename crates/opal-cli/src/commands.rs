use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use opal_persistence::{CommitReport, InMemoryBackend, PersistenceConfig, PersistenceManager};
use opal_schema::{ClassDefinition, ClassSchema, InMemoryIntrospector, SchemaRegistry};
use opal_types::{Identifier, ObjectRef, RawRecord};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Schema(args) => cmd_schema(args, &config, &format),
        Command::Map(args) => cmd_map(args, config, &format),
        Command::Check(args) => cmd_check(args, config, &format),
        Command::Config => cmd_config(&config, &format),
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<PersistenceConfig> {
    let Some(path) = path else {
        return Ok(PersistenceConfig::default());
    };
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(PersistenceConfig::from_toml_str(&source)?)
}

pub fn load_model(path: &Path) -> anyhow::Result<Vec<ClassDefinition>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading model {}", path.display()))?;
    let definitions: Vec<ClassDefinition> = serde_json::from_str(&source)
        .with_context(|| format!("parsing model {}", path.display()))?;
    debug!(classes = definitions.len(), path = %path.display(), "model loaded");
    Ok(definitions)
}

pub fn load_records(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading records {}", path.display()))?;
    let records: Vec<RawRecord> = serde_json::from_str(&source)
        .with_context(|| format!("parsing records {}", path.display()))?;
    debug!(records = records.len(), path = %path.display(), "records loaded");
    Ok(records)
}

/// Builds the schemas for the named classes, or for the whole model.
pub fn build_schemas(
    definitions: Vec<ClassDefinition>,
    classes: &[String],
    config: &PersistenceConfig,
) -> anyhow::Result<Vec<ClassSchema>> {
    let registry = SchemaRegistry::new(Arc::new(InMemoryIntrospector::from_definitions(definitions)))
        .with_identity_property(config.synthetic_identity_property.clone());
    let snapshot = if classes.is_empty() {
        registry.ensure_all()?
    } else {
        registry.ensure(classes)?
    };
    Ok(snapshot.schemas.iter().cloned().collect())
}

/// A manager over an in-memory backend seeded with the given records.
pub fn open(
    definitions: Vec<ClassDefinition>,
    records: Vec<RawRecord>,
    config: PersistenceConfig,
) -> anyhow::Result<(PersistenceManager, Arc<InMemoryBackend>)> {
    let introspector = Arc::new(InMemoryIntrospector::from_definitions(definitions));
    let backend = Arc::new(InMemoryBackend::with_records(records));
    let manager = PersistenceManager::from_introspector(introspector, backend.clone(), config)?;
    Ok((manager, backend))
}

/// Maps every stored record, then commits. A consistent store commits
/// nothing.
pub fn check(
    definitions: Vec<ClassDefinition>,
    records: Vec<RawRecord>,
    config: PersistenceConfig,
) -> anyhow::Result<(usize, CommitReport)> {
    let (mut manager, backend) = open(definitions, records, config)?;
    let mut mapped = 0;
    for identifier in backend.identifiers() {
        let identifier = Identifier::new(identifier)?;
        if manager.object_by_identifier(&identifier)?.is_some() {
            mapped += 1;
        }
    }
    let report = manager.persist_all()?;
    Ok((mapped, report))
}

fn cmd_schema(args: SchemaArgs, config: &PersistenceConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let schemas = build_schemas(load_model(&args.model.model)?, &args.classes, config)?;
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }
    for schema in &schemas {
        let mut header = format!("{} {}", schema.class_name().bold(), schema.model_kind().to_string().cyan());
        if let Some(repository) = schema.repository_class_name() {
            header.push_str(&format!(" (aggregate root of {})", repository.yellow()));
        }
        if schema.is_lazy_loadable() {
            header.push_str(&format!(" {}", "lazy".dimmed()));
        }
        println!("{header}");
        for property in schema.properties() {
            let mut marks = Vec::new();
            if schema.identity_property() == Some(property.name.as_str()) {
                marks.push(if schema.has_natural_identity() { "identity" } else { "synthetic identity" });
            }
            if property.lazy {
                marks.push("lazy");
            }
            let marks = if marks.is_empty() {
                String::new()
            } else {
                format!(" [{}]", marks.join(", "))
            };
            println!("  {}: {}{}", property.name, property.declared_type, marks.dimmed());
        }
    }
    Ok(())
}

fn cmd_map(args: MapArgs, config: PersistenceConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let (mut manager, backend) = open(
        load_model(&args.model.model)?,
        load_records(&args.records)?,
        config,
    )?;
    for identifier in &args.hide {
        backend.hide(identifier.as_str());
    }
    let identifiers = if args.identifiers.is_empty() {
        backend.identifiers()
    } else {
        args.identifiers
    };

    let mut mapped: Vec<(String, Option<ObjectRef>)> = Vec::new();
    for identifier in identifiers {
        let r = manager.object_by_identifier(&Identifier::new(identifier.as_str())?)?;
        mapped.push((identifier, r));
    }

    if let OutputFormat::Json = format {
        let mut frozen = Vec::new();
        for r in mapped.iter().filter_map(|(_, r)| *r) {
            frozen.push(manager.mapper().freeze_object(manager.session(), r)?);
        }
        println!("{}", serde_json::to_string_pretty(&frozen)?);
        return Ok(());
    }

    for (identifier, r) in &mapped {
        match r {
            Some(r) => {
                let object = manager.session().peek(*r)?;
                let state = if object.is_loaded() { "loaded".green() } else { "lazy".dimmed() };
                println!(
                    "{} {} {} ({}, {} properties)",
                    "✓".green(),
                    identifier.yellow(),
                    object.class_name().bold(),
                    state,
                    object.properties().len()
                );
            }
            None => println!("{} {} not found", "✗".red(), identifier.yellow()),
        }
    }
    println!("Pending proxies: {}", manager.session().pending_proxies());
    Ok(())
}

fn cmd_check(args: CheckArgs, config: PersistenceConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let (mapped, report) = check(
        load_model(&args.model.model)?,
        load_records(&args.records)?,
        config,
    )?;
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Mapped {} objects", mapped.to_string().bold());
    if report.is_empty() {
        println!("{} Store is consistent: nothing to commit.", "✓".green().bold());
    } else {
        println!(
            "{} Commit sent {} new, {} dirty, {} removed",
            "!".yellow().bold(),
            report.new.len(),
            report.dirty.len(),
            report.removed.len()
        );
        for identifier in report.new.iter().chain(&report.dirty) {
            println!("  {}", identifier.to_string().yellow());
        }
    }
    Ok(())
}

fn cmd_config(config: &PersistenceConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
