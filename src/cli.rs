//! Superficie de control por línea de comandos.
//!
//! Los comandos que cambian estado ejecutan primero la recuperación y después
//! conducen el job afectado hasta que se estaciona (gate, pausa) o termina.
//! `serve` mantiene el worker y el barrido en segundo plano hasta Ctrl-C.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use log::info;
use reel_core::{Gate, Job, Orchestrator, Patch, PatchError};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::config::AppConfig;
use crate::errors::AppError;

#[derive(Parser, Debug)]
#[command(name = "reelflow", version, about = "Staged content pipelines with human approval gates")]
pub struct Cli {
    /// Directorio de datos (sobrescribe REELFLOW_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Registro de stages en JSON (sobrescribe REELFLOW_STAGES_FILE).
    #[arg(long, global = true)]
    pub stages_file: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Command,
}

impl Cli {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.store.data_dir = dir.clone();
        }
        if let Some(file) = &self.stages_file {
            config.stages_file = Some(file.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crea un job y lo ejecuta hasta el primer gate.
    Submit {
        slug: String,
        /// Config del job como JSON inline.
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        config_file: Option<PathBuf>,
    },
    Show {
        job_id: Uuid,
    },
    List,
    Approve(DecisionArgs),
    Reject(DecisionArgs),
    Resume {
        job_id: Uuid,
        /// Re-ejecuta el stage aunque ya tenga artifacts.
        #[arg(long)]
        force: bool,
    },
    Cancel {
        job_id: Uuid,
    },
    /// Estado de gate por stage.
    Gates {
        job_id: Uuid,
    },
    Decisions {
        job_id: Uuid,
    },
    /// Aplica un patch fuera de una decisión de gate.
    Patch {
        job_id: Uuid,
        stage: String,
        #[command(flatten)]
        patch: PatchArgs,
    },
    Events {
        job_id: Uuid,
        /// Solo eventos con ts estrictamente posterior (RFC 3339).
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Stream en vivo (JSON por línea) hasta un evento terminal.
    Follow {
        job_id: Uuid,
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    PatchTypes,
    /// Un barrido de timeouts; los jobs auto-aprobados se conducen.
    Sweep,
    /// Worker y barrido en segundo plano hasta Ctrl-C.
    Serve,
}

#[derive(Args, Debug)]
pub struct DecisionArgs {
    pub job_id: Uuid,
    pub stage: String,
    #[arg(long)]
    pub by: String,
    #[arg(long)]
    pub notes: Option<String>,
    #[command(flatten)]
    pub patch: PatchArgs,
}

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Documento de patch como JSON inline.
    #[arg(long = "patch")]
    pub inline: Option<String>,
    #[arg(long = "patch-file")]
    pub file: Option<PathBuf>,
}

impl PatchArgs {
    fn load(&self) -> Result<Option<Patch>, AppError> {
        match json_arg("patch", self.inline.as_deref(), self.file.as_ref())? {
            Some(v) => Ok(Some(Patch::from_value(v).map_err(patch_error)?)),
            None => Ok(None),
        }
    }
}

fn patch_error(e: PatchError) -> AppError {
    AppError::Orchestrator(e.into())
}

fn json_arg(what: &str, inline: Option<&str>, file: Option<&PathBuf>) -> Result<Option<Value>, AppError> {
    let raw = match (inline, file) {
        (Some(_), Some(_)) => return Err(AppError::Usage(format!("use either --{what} or --{what}-file, not both"))),
        (Some(s), None) => s.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Ok(None),
    };
    serde_json::from_str(&raw).map(Some).map_err(|e| AppError::Usage(format!("--{what}: {e}")))
}

#[derive(Serialize)]
struct Outcome {
    job: Job,
    pending_gate: Option<Gate>,
}

fn outcome(orch: &Orchestrator, job: Job) -> Result<Outcome, AppError> {
    let pending_gate = orch.pending_gate(job.id)?;
    Ok(Outcome { job, pending_gate })
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub async fn execute(app: &App, cmd: Command, out: &mut dyn Write) -> Result<(), AppError> {
    let orch = &app.orchestrator;
    match cmd {
        Command::Submit { slug, config, config_file } => {
            app.recover().await?;
            let config = json_arg("config", config.as_deref(), config_file.as_ref())?.unwrap_or_else(|| json!({}));
            let job = orch.submit(&slug, config)?;
            let job = app.drive(job.id).await?;
            print_json(out, &outcome(orch, job)?)
        }
        Command::Show { job_id } => print_json(out, &outcome(orch, orch.get_job(job_id)?)?),
        Command::List => print_json(out, &orch.list_jobs()?),
        Command::Approve(args) => {
            app.recover().await?;
            let patch = args.patch.load()?;
            orch.approve(args.job_id, &args.stage, &args.by, args.notes, patch).await?;
            let job = app.drive(args.job_id).await?;
            print_json(out, &outcome(orch, job)?)
        }
        Command::Reject(args) => {
            app.recover().await?;
            let patch = args.patch.load()?;
            orch.reject(args.job_id, &args.stage, &args.by, args.notes, patch).await?;
            let job = app.drive(args.job_id).await?;
            print_json(out, &outcome(orch, job)?)
        }
        Command::Resume { job_id, force } => {
            app.recover().await?;
            orch.resume(job_id, force).await?;
            let job = app.drive(job_id).await?;
            print_json(out, &outcome(orch, job)?)
        }
        Command::Cancel { job_id } => {
            app.recover().await?;
            let job = orch.cancel(job_id).await?;
            print_json(out, &outcome(orch, job)?)
        }
        Command::Gates { job_id } => print_json(out, &orch.gate_status(job_id)?),
        Command::Decisions { job_id } => print_json(out, &orch.decisions(job_id)?),
        Command::Patch { job_id, stage, patch } => {
            app.recover().await?;
            let patch = patch.load()?.ok_or_else(|| AppError::Usage("a patch is required (--patch or --patch-file)".into()))?;
            let written = orch.apply_patch(job_id, &stage, patch).await?;
            print_json(out, &written)
        }
        Command::Events { job_id, since, limit } => print_json(out, &orch.poll_events(job_id, since, limit)?),
        Command::Follow { job_id, since } => {
            let mut sub = orch.subscribe(job_id, since)?;
            while let Some(event) = sub.next().await {
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
                out.flush()?;
            }
            Ok(())
        }
        Command::PatchTypes => print_json(out, &Orchestrator::supported_patch_types()),
        Command::Sweep => {
            app.recover().await?;
            let report = orch.sweep_timeouts(Utc::now()).await?;
            for (job_id, _) in &report.auto_approved {
                app.drive(*job_id).await?;
            }
            print_json(out, &report)
        }
        Command::Serve => {
            let report = app.recover().await?;
            let handle = orch.spawn_background()?;
            info!("serve:started requeued={} interrupted={}", report.requeued.len(), report.interrupted.len());
            tokio::signal::ctrl_c().await?;
            handle.shutdown();
            info!("serve:stopped");
            Ok(())
        }
    }
}

