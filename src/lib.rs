//! cfgroots: configuration root location and recovery for versioned settings stores
//!
//! A product that has been re-versioned many times keeps one configuration root
//! per schema revision in a hierarchical settings store. At startup exactly one
//! of those roots must be chosen, and a complete, valid configuration must never
//! be lost on the way.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All structural store access routes through [`core::broker::StoreBroker`] for:
//! - Serialization (one store-wide lock, shared by every clone)
//! - Audit logging (`broker.events.jsonl`)
//!
//! ## Components
//!
//! - [`core::roots`]: newest-first catalogue of roots
//! - [`core::guard`]: write-in-progress marker and root classification
//! - [`core::rename`]: copy-then-delete subtree rename
//! - [`core::backup`]: single backup of root 0, promotion and quarantine
//! - [`core::locator`]: startup scan and recovery
//! - [`core::import`]: bounded import pointer resolution
//! - [`core::startup`], [`core::cleanup`]: the host-side launch sequence
//!
//! # Examples
//!
//! ```bash
//! # What does the store hold?
//! cfgroots classify
//!
//! # Run the startup sequence, answering the migration prompt up front
//! cfgroots locate --answer load-delete:7 --apply
//!
//! # Capture a backup before a risky operation
//! cfgroots backup capture
//! ```

pub mod core;
mod cli;

pub use crate::core::error::{EngineError, ErrorKind};

use cli::{BackupCommand, Cli, Command, ImportCommand, LocateCli, PayloadCommand};
use crate::core::backup::{BackupManager, BackupStatus};
use crate::core::broker::{self, StoreBroker};
use crate::core::carryover::CarryOver;
use crate::core::cleanup::Cleanup;
use crate::core::collaborator::{
    Candidate, DecisionCollaborator, ImportChoice, ImportConflict, MigrationChoice,
    ScriptedCollaborator,
};
use crate::core::config::{self, EngineConfig};
use crate::core::db::SqliteStore;
use crate::core::guard::{AtomicSaveGuard, RootState};
use crate::core::import::{ImportResolver, Resolution};
use crate::core::locator::{MigrationDecision, MigrationLocator, MigrationPlan};
use crate::core::payload::Subtree;
use crate::core::rename::KeyRenamer;
use crate::core::roots::{ConfigRoot, VersionRootTable};
use crate::core::startup::{Startup, StartupPlan};
use crate::core::store::SettingsStore;
use crate::core::time::{self, Surface};

use clap::Parser;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log filter for the CLI (`tracing-subscriber` directive syntax).
pub const LOG_ENV: &str = "CFGROOTS_LOG";

/// One broker and one root table, shared by every component handed out.
#[derive(Clone)]
pub struct Engine {
    broker: StoreBroker,
    table: VersionRootTable,
}

impl Engine {
    pub fn new(store: Arc<dyn SettingsStore>, table: VersionRootTable) -> Self {
        Self {
            broker: StoreBroker::new(store),
            table,
        }
    }

    /// Opens the SQLite store named by `config`, with its audit log and actor.
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        let store = SqliteStore::open(&config.store)?;
        let mut broker = StoreBroker::new(Arc::new(store)).with_actor(&config.actor);
        if let Some(log) = &config.audit_log {
            broker = broker.with_audit_log(log);
        }
        Ok(Self {
            broker,
            table: config.root_table()?,
        })
    }

    pub fn broker(&self) -> &StoreBroker {
        &self.broker
    }

    pub fn table(&self) -> &VersionRootTable {
        &self.table
    }

    pub fn guard(&self) -> AtomicSaveGuard {
        AtomicSaveGuard::new(self.broker.clone())
    }

    pub fn renamer(&self) -> KeyRenamer {
        KeyRenamer::new(self.broker.clone())
    }

    pub fn backup(&self) -> BackupManager {
        BackupManager::new(self.broker.clone(), &self.table)
    }

    pub fn locator(&self) -> MigrationLocator {
        MigrationLocator::new(self.broker.clone(), self.table.clone())
    }

    pub fn importer(&self) -> ImportResolver {
        ImportResolver::new(self.broker.clone(), &self.table)
    }

    pub fn startup(&self) -> Startup {
        Startup::new(self.broker.clone(), self.table.clone())
    }

    pub fn cleanup(&self) -> Cleanup {
        Cleanup::new(self.broker.clone(), self.table.clone())
    }

    pub fn carryover(&self) -> CarryOver {
        CarryOver::new(self.broker.clone(), self.table.clone())
    }

    fn root(&self, index: usize) -> Result<&ConfigRoot, EngineError> {
        self.table.get(index).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "no root at index {} (table has {})",
                index,
                self.table.len()
            ))
        })
    }
}

/// Installs the stderr `fmt` subscriber filtered by [`LOG_ENV`] (default `warn`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run() -> Result<(), EngineError> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = config::load_config(&cli.config)?;
    if let Some(store) = &cli.store {
        config.store = store.clone();
    }

    match cli.command {
        Command::Roots { out } => show_roots(&config.root_table()?, &out.format),
        Command::Audit { limit, out } => show_audit(config.audit_log.as_deref(), limit, &out.format),
        command => {
            let engine = Engine::open(&config)?;
            dispatch(&engine, command)
        }
    }
}

fn dispatch(engine: &Engine, command: Command) -> Result<(), EngineError> {
    match command {
        Command::Classify { index, all, out } => run_classify(engine, index, all, &out.format),
        Command::Locate(locate) => run_locate(engine, &locate),
        Command::Backup { command } => run_backup(engine, command),
        Command::Import { command } => run_import(engine, command),
        Command::Payload { command } => run_payload(engine, command),
        Command::Roots { .. } | Command::Audit { .. } => Ok(()),
    }
}

fn wants_json(format: &str) -> Result<bool, EngineError> {
    match format {
        "json" => Ok(true),
        "text" => Ok(false),
        other => Err(EngineError::ConfigError(format!(
            "unsupported format '{}' (expected text or json)",
            other
        ))),
    }
}

fn print_envelope(surface: Surface, body: serde_json::Value) -> Result<(), EngineError> {
    let envelope = time::command_envelope(surface, body);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn colored_state(state: RootState) -> colored::ColoredString {
    use colored::Colorize;
    match state {
        RootState::Valid => state.as_str().bright_green(),
        RootState::Empty => state.as_str().bright_blue(),
        RootState::Corrupted => state.as_str().bright_red().bold(),
        RootState::Absent => state.as_str().dimmed(),
    }
}

fn show_roots(table: &VersionRootTable, format: &str) -> Result<(), EngineError> {
    use colored::Colorize;
    if wants_json(format)? {
        let roots: Vec<&ConfigRoot> = table.iter().collect();
        return print_envelope(Surface::Roots, serde_json::json!({ "roots": roots }));
    }
    for root in table.iter() {
        let marker = if root.is_active() { "▸".bright_cyan().to_string() } else { " ".to_string() };
        println!(
            "{} {:>3}  {:<24} {}",
            marker,
            root.index,
            root.label.bright_white(),
            root.location
        );
    }
    Ok(())
}

fn show_audit(path: Option<&Path>, limit: Option<usize>, format: &str) -> Result<(), EngineError> {
    use colored::Colorize;
    let json = wants_json(format)?;
    let Some(path) = path else {
        if json {
            return print_envelope(Surface::Audit, serde_json::json!({ "enabled": false, "events": [] }));
        }
        println!("{} audit log disabled (set audit_log in cfgroots.toml)", "ℹ".bright_blue());
        return Ok(());
    };
    let mut events = broker::read_audit_log(path)?;
    if let Some(limit) = limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    if json {
        return print_envelope(Surface::Audit, serde_json::json!({ "enabled": true, "events": events }));
    }
    for ev in &events {
        let status = if ev.status == "success" {
            ev.status.bright_green()
        } else {
            ev.status.bright_red()
        };
        match &ev.detail {
            Some(detail) => println!("{} {:<28} {} {}", ev.ts, ev.op, status, detail),
            None => println!("{} {:<28} {}", ev.ts, ev.op, status),
        }
    }
    Ok(())
}

fn run_classify(
    engine: &Engine,
    index: Option<usize>,
    all: bool,
    format: &str,
) -> Result<(), EngineError> {
    let roots: Vec<&ConfigRoot> = match index {
        Some(i) => vec![engine.root(i)?],
        None => engine.table().iter().collect(),
    };
    let guard = engine.guard();
    let mut rows = Vec::new();
    for root in roots {
        let state = guard.classify(&root.location)?;
        if state == RootState::Absent && !all && index.is_none() {
            continue;
        }
        rows.push((root, state));
    }

    if wants_json(format)? {
        let items: Vec<serde_json::Value> = rows
            .iter()
            .map(|(root, state)| {
                serde_json::json!({
                    "index": root.index,
                    "label": root.label,
                    "location": root.location,
                    "state": state,
                })
            })
            .collect();
        return print_envelope(Surface::Classify, serde_json::json!({ "roots": items }));
    }
    if rows.is_empty() {
        println!("no configuration roots present");
    }
    for (root, state) in rows {
        println!(
            "{:>3}  {:<10} {:<24} {}",
            root.index,
            colored_state(state),
            root.label,
            root.location
        );
    }
    Ok(())
}

fn build_collaborator(locate: &LocateCli) -> Result<Box<dyn DecisionCollaborator>, EngineError> {
    if !locate.is_scripted() {
        return Ok(Box::new(TerminalCollaborator));
    }
    let mut scripted = ScriptedCollaborator::new().confirming_cleanup(locate.confirm_cleanup);
    if let Some(answer) = &locate.answer {
        scripted = scripted.answering(answer.parse().map_err(EngineError::ConfigError)?);
    }
    if let Some(choice) = &locate.import_choice {
        scripted = scripted.on_import(choice.parse().map_err(EngineError::ConfigError)?);
    }
    Ok(Box::new(scripted))
}

fn run_locate(engine: &Engine, locate: &LocateCli) -> Result<(), EngineError> {
    let json = wants_json(&locate.out.format)?;
    let mut collaborator = build_collaborator(locate)?;
    let startup = engine.startup();

    let plan = match startup.run(collaborator.as_mut()) {
        Ok(plan) => plan,
        Err(e) if e.kind() == ErrorKind::StoreAccess => {
            tracing::warn!(error = %e, "store unavailable, starting with defaults");
            StartupPlan::Migrate(MigrationPlan::degraded())
        }
        Err(e) => return Err(e),
    };

    let mut applied = serde_json::Value::Null;
    if locate.apply {
        applied = apply_plan(engine, &startup, &plan, !locate.keep_source)?;
    }

    if json {
        return print_envelope(
            Surface::Locate,
            serde_json::json!({ "plan": plan, "applied": applied }),
        );
    }
    print_plan(engine, &plan);
    if locate.apply {
        print_applied(&applied);
    }
    Ok(())
}

fn apply_plan(
    engine: &Engine,
    startup: &Startup,
    plan: &StartupPlan,
    delete_source: bool,
) -> Result<serde_json::Value, EngineError> {
    let cleanup = engine.cleanup();
    match plan {
        StartupPlan::Import(import) => {
            startup.adopt(&import.source)?;
            let source_deleted = cleanup.finish_import(import, delete_source)?;
            Ok(serde_json::json!({
                "adopted": import.source,
                "source_deleted": source_deleted,
            }))
        }
        StartupPlan::Migrate(migration) => {
            let mut adopted = None;
            if let MigrationDecision::LoadRoot(index) = migration.decision {
                let source = &engine.root(index)?.location;
                startup.adopt(source)?;
                adopted = Some(source.clone());
            }
            let deleted = if migration.decision == MigrationDecision::Abort {
                Vec::new()
            } else {
                cleanup.delete_superseded(migration)?
            };
            Ok(serde_json::json!({ "adopted": adopted, "deleted": deleted }))
        }
        StartupPlan::Abort => Ok(serde_json::Value::Null),
    }
}

fn print_plan(engine: &Engine, plan: &StartupPlan) {
    use colored::Colorize;
    match plan {
        StartupPlan::Import(import) => {
            println!(
                "{} import from {} ({} hop{})",
                "▸".bright_cyan(),
                import.source.to_string().bright_white(),
                import.hops,
                if import.hops == 1 { "" } else { "s" }
            );
            if import.replaced_active {
                println!("  {} root 0 was cleared for the import", "⚠".bright_yellow());
            }
        }
        StartupPlan::Abort => println!("{} aborted", "✗".bright_red()),
        StartupPlan::Migrate(migration) => {
            let recovery = &migration.recovery;
            if let Some(quarantine) = &recovery.promoted {
                println!(
                    "  {} recovered root 0 from backup (corrupted copy kept at {})",
                    "✓".bright_green(),
                    quarantine
                );
            }
            if let Some(quarantine) = &recovery.quarantined {
                println!("  {} corrupted root 0 moved to {}", "⚠".bright_yellow(), quarantine);
            }
            if recovery.root0_deleted {
                println!("  {} corrupted root 0 deleted", "⚠".bright_yellow());
            }
            if recovery.restored {
                println!("  {} restored root 0 from backup", "✓".bright_green());
            }
            if recovery.backup_kept {
                println!(
                    "  {} backup kept at {} (root 0 is not valid)",
                    "⚠".bright_yellow(),
                    engine.backup().location()
                );
            }
            if recovery.backup_discarded {
                println!("  {} backup discarded", "ℹ".bright_blue());
            }
            match migration.decision {
                MigrationDecision::LoadRoot(index) => {
                    let label = engine
                        .table()
                        .get(index)
                        .map(|r| r.label.as_str())
                        .unwrap_or("?");
                    println!("{} load root {} ({})", "✓".bright_green(), index, label.bright_white());
                }
                MigrationDecision::UseDefaults => {
                    println!("{} use defaults", "▸".bright_cyan())
                }
                MigrationDecision::Abort => println!("{} aborted", "✗".bright_red()),
            }
            if !migration.delete_after_load.is_empty() {
                let indices: Vec<String> = migration
                    .delete_after_load
                    .iter()
                    .map(|i| i.to_string())
                    .collect();
                println!("  delete after load: {}", indices.join(", "));
            }
        }
    }
}

fn print_applied(applied: &serde_json::Value) {
    use colored::Colorize;
    if applied.is_null() {
        return;
    }
    if let Some(source) = applied.get("adopted").and_then(|v| v.as_str()) {
        println!("  {} adopted configuration from {}", "✓".bright_green(), source);
    }
    if let Some(deleted) = applied.get("deleted").and_then(|v| v.as_array()) {
        for location in deleted.iter().filter_map(|v| v.as_str()) {
            println!("  {} deleted {}", "✓".bright_green(), location);
        }
    }
    if applied.get("source_deleted").and_then(|v| v.as_bool()) == Some(true) {
        println!("  {} import source deleted", "✓".bright_green());
    }
}

fn run_backup(engine: &Engine, command: BackupCommand) -> Result<(), EngineError> {
    use colored::Colorize;
    let backup = engine.backup();
    match command {
        BackupCommand::Inspect { out } => {
            let location = backup.location();
            let status = backup.inspect()?;
            if wants_json(&out.format)? {
                return print_envelope(
                    Surface::BackupInspect,
                    serde_json::json!({ "location": location, "status": status }),
                );
            }
            let text = match status {
                BackupStatus::Absent => "absent".dimmed(),
                BackupStatus::Complete => "complete".bright_green(),
                BackupStatus::Incomplete => "incomplete (discarded)".bright_yellow(),
            };
            println!("{} {}", location, text);
        }
        BackupCommand::Capture => {
            if backup.capture()? {
                println!("{} backup captured at {}", "✓".bright_green(), backup.location());
            } else {
                println!(
                    "{} root 0 is absent or corrupted, nothing captured",
                    "⚠".bright_yellow()
                );
            }
        }
        BackupCommand::Promote => {
            let quarantine = backup.promote()?;
            println!(
                "{} backup promoted, corrupted root kept at {}",
                "✓".bright_green(),
                quarantine
            );
        }
        BackupCommand::Discard => {
            if backup.discard()? {
                println!("{} backup discarded", "✓".bright_green());
            } else {
                println!("{} no backup present", "ℹ".bright_blue());
            }
        }
    }
    Ok(())
}

fn run_import(engine: &Engine, command: ImportCommand) -> Result<(), EngineError> {
    use colored::Colorize;
    let importer = engine.importer();
    match command {
        ImportCommand::Resolve { out } => {
            let pointer = importer.pointer()?;
            let resolution = importer.resolve()?;
            if wants_json(&out.format)? {
                return print_envelope(
                    Surface::ImportResolve,
                    serde_json::json!({ "pointer": pointer, "resolution": resolution }),
                );
            }
            match resolution {
                Resolution::NoPointer => println!("no import pending"),
                Resolution::Target(target) => {
                    println!(
                        "{} {} ({} hop{})",
                        "▸".bright_cyan(),
                        target.source,
                        target.hops,
                        if target.hops == 1 { "" } else { "s" }
                    );
                    if target.conflict {
                        println!(
                            "  {} root 0 already holds a configuration",
                            "⚠".bright_yellow()
                        );
                    }
                }
                Resolution::Invalid(reason) => {
                    println!("{} invalid pointer: {:?}", "✗".bright_red(), reason)
                }
            }
        }
        ImportCommand::Set { pointer } => {
            importer.set_pointer(&pointer)?;
            println!("{} import pointer set to {}", "✓".bright_green(), pointer);
        }
        ImportCommand::Clear => {
            if importer.clear_pointer()? {
                println!("{} import pointer cleared", "✓".bright_green());
            } else {
                println!("{} no import pointer present", "ℹ".bright_blue());
            }
        }
    }
    Ok(())
}

fn run_payload(engine: &Engine, command: PayloadCommand) -> Result<(), EngineError> {
    use colored::Colorize;
    let guard = engine.guard();
    match command {
        PayloadCommand::Show { index } => {
            let root = engine.root(index)?;
            let payload = guard.read_payload(&root.location)?;
            let fingerprint = match &payload {
                Some(p) => Some(p.fingerprint()?),
                None => None,
            };
            let out = serde_json::json!({
                "root": root,
                "payload": payload,
                "fingerprint": fingerprint,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        PayloadCommand::Save { file, index } => {
            let root = engine.root(index)?;
            let content = std::fs::read_to_string(&file).map_err(EngineError::IoError)?;
            let payload: Subtree = serde_json::from_str(&content)?;
            guard.save_payload(&root.location, &payload)?;
            println!(
                "{} saved {} value(s) into {}",
                "✓".bright_green(),
                payload.value_count(),
                root.location
            );
        }
    }
    Ok(())
}

fn prompt(question: &str) -> Option<String> {
    eprint!("{} ", question);
    let _ = io::stderr().flush();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Prompts on stderr and reads answers from stdin. End of input answers abort.
struct TerminalCollaborator;

impl DecisionCollaborator for TerminalCollaborator {
    fn ask_for_migration_choice(&mut self, candidates: &[Candidate]) -> MigrationChoice {
        eprintln!("Configurations from previous versions were found:");
        for c in candidates {
            eprintln!("  {:>3}  {:<24} {}", c.index, c.label, c.location);
        }
        loop {
            let Some(answer) = prompt("Load which? [load:<i> | load-delete:<i> | defaults-delete | abort]")
            else {
                return MigrationChoice::Abort;
            };
            match answer.parse() {
                Ok(choice) => return choice,
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    fn ask_for_import_conflict(&mut self, conflict: &ImportConflict) -> ImportChoice {
        eprintln!(
            "{} already holds a configuration; an import from {} is pending.",
            conflict.active, conflict.source
        );
        loop {
            let Some(answer) = prompt("Keep current, overwrite, or abort? [keep | overwrite | abort]")
            else {
                return ImportChoice::Abort;
            };
            match answer.parse() {
                Ok(choice) => return choice,
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    fn confirm_corrupted_cleanup(&mut self, root: &ConfigRoot) -> bool {
        eprintln!(
            "The configuration at {} was not saved completely and no backup can restore it.",
            root.location
        );
        matches!(
            prompt("Move it aside and continue? [y/N]").as_deref(),
            Some("y") | Some("Y") | Some("yes")
        )
    }
}
