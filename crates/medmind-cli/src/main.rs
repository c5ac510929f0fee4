use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use medmind_core::{fixtures, schema, CollectionInput, TranscriptSegment};

const DEFAULT_LOG_FILTER: &str = "medmind=info,medmind_core=info,medmind_runtime=info";

#[derive(Parser, Debug)]
#[command(name = "medmind", version, about = "Evidence-grounded clinical analysis pipeline")]
struct Cli {
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    #[arg(long, global = true, help = "Pretty-print JSON output")]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the evidence tokens collected from the inputs
    Evidence {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Post-process a saved reasoning-service record
    Analyze {
        #[arg(long, help = "Reasoning-service output (JSON)")]
        raw: PathBuf,
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Run a cached demo case through the pipeline
    Demo { case: String },
    /// List demo cases
    Cases {
        #[arg(long, help = "Run the fixture sanity check")]
        check: bool,
    },
    /// Print the response schema sent to the reasoning service
    Schema,
    /// Analyze live through the configured reasoning provider
    #[cfg(feature = "gemini")]
    Run {
        #[arg(long, help = "Runtime config (YAML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Demo case whose simulation context is sent")]
        demo: Option<String>,
        #[command(flatten)]
        inputs: InputArgs,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Args, Debug, Default)]
struct InputArgs {
    #[arg(long, conflicts_with = "symptoms_file")]
    symptoms: Option<String>,
    #[arg(long)]
    symptoms_file: Option<PathBuf>,
    #[arg(long, conflicts_with = "report_file")]
    report: Option<String>,
    #[arg(long)]
    report_file: Option<PathBuf>,
    #[arg(long = "image", help = "Image file (repeatable)")]
    images: Vec<PathBuf>,
    #[arg(long, help = "Audio recording sent with the live request")]
    audio: Option<PathBuf>,
    #[arg(long, help = "Transcript segments (JSON array of {start, end, text})")]
    transcript: Option<PathBuf>,
}

/// Inputs with files read.
struct LoadedInputs {
    symptoms: String,
    report: String,
    image_names: Vec<String>,
    transcript: Option<Vec<TranscriptSegment>>,
}

impl LoadedInputs {
    fn collection_input(&self) -> CollectionInput<'_> {
        CollectionInput {
            images: &self.image_names,
            report_text: &self.report,
            symptoms_text: &self.symptoms,
            transcript_segments: self.transcript.as_deref(),
        }
    }
}

impl InputArgs {
    fn load(&self) -> anyhow::Result<LoadedInputs> {
        let symptoms = text_arg(self.symptoms.as_deref(), self.symptoms_file.as_deref())?;
        let report = text_arg(self.report.as_deref(), self.report_file.as_deref())?;
        let image_names = self
            .images
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.to_string_lossy().into_owned())
            })
            .collect();
        let transcript = match &self.transcript {
            Some(path) => Some(
                serde_json::from_str(&read_file(path)?)
                    .with_context(|| format!("Invalid transcript {}", path.display()))?,
            ),
            None => None,
        };

        Ok(LoadedInputs {
            symptoms,
            report,
            image_names,
            transcript,
        })
    }
}

fn text_arg(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text.to_string()),
        (None, Some(path)) => read_file(path),
        (None, None) => Ok(String::new()),
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn emit<T: Serialize>(value: &T, format: OutputFormat, pretty: bool) -> anyhow::Result<()> {
    let out = match format {
        OutputFormat::Json if pretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", out.trim_end());
    Ok(())
}

#[derive(Serialize)]
struct CaseEntry {
    id: &'static str,
    label: &'static str,
    image_label: &'static str,
    cached: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Evidence { inputs } => {
            let loaded = inputs.load()?;
            let evidence = medmind_core::collect_all(&loaded.collection_input());
            emit(&evidence, cli.format, cli.pretty)?;
        }
        Commands::Analyze { raw, inputs } => {
            let raw: serde_json::Value = serde_json::from_str(&read_file(raw)?)
                .with_context(|| format!("{} is not valid JSON", raw.display()))?;
            let drift = schema::report_drift(&raw);
            if drift > 0 {
                tracing::info!(drift, "Record deviates from the response schema; continuing");
            }
            let loaded = inputs.load()?;
            let analysis = medmind_core::analyze(&raw, &loaded.collection_input());
            emit(&analysis, cli.format, cli.pretty)?;
        }
        Commands::Demo { case } => {
            let Some(demo) = fixtures::demo_case(case) else {
                let ids: Vec<_> = fixtures::demo_cases().iter().map(|c| c.id).collect();
                bail!("Unknown demo case '{}'. Available: {}", case, ids.join(", "));
            };
            let Some(analysis) = medmind_core::run_cached(demo.id, &demo.evidence(), demo.text()) else {
                bail!(
                    "No cached record for '{}'. Cached cases: {}",
                    demo.id,
                    fixtures::cached_case_ids().join(", ")
                );
            };
            emit(&analysis, cli.format, cli.pretty)?;
        }
        Commands::Cases { check } => {
            if *check {
                let violations = fixtures::sanity_check();
                for violation in &violations {
                    eprintln!("{}", violation);
                }
                if !violations.is_empty() {
                    bail!("{} fixture violation(s)", violations.len());
                }
                tracing::info!(
                    n_fixtures = fixtures::cached_case_ids().len(),
                    "All cached fixtures pass"
                );
            }
            let cached = fixtures::cached_case_ids();
            let cases: Vec<CaseEntry> = fixtures::demo_cases()
                .iter()
                .map(|c| CaseEntry {
                    id: c.id,
                    label: c.label,
                    image_label: c.image_label,
                    cached: cached.contains(&c.id),
                })
                .collect();
            emit(&cases, cli.format, cli.pretty)?;
        }
        Commands::Schema => {
            emit(&schema::response_schema()?, cli.format, cli.pretty)?;
        }
        #[cfg(feature = "gemini")]
        Commands::Run {
            config,
            demo,
            inputs,
        } => {
            let analysis = run_live(config.as_deref(), demo.as_deref(), inputs).await?;
            emit(&analysis, cli.format, cli.pretty)?;
        }
    }

    Ok(())
}

#[cfg(feature = "gemini")]
async fn run_live(
    config_path: Option<&Path>,
    demo: Option<&str>,
    inputs: &InputArgs,
) -> anyhow::Result<medmind_core::Analysis> {
    use medmind_runtime::{AnalysisRequest, AnalysisService, ProviderRegistry, RuntimeConfig};

    let config = match config_path {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    }
    .with_env_overrides()?;

    let demo_context = match demo {
        Some(id) => Some(
            fixtures::demo_case(id)
                .with_context(|| format!("Unknown demo case '{}'", id))?
                .context
                .to_string(),
        ),
        None => None,
    };

    let loaded = inputs.load()?;
    let service = AnalysisService::from_config(config, &ProviderRegistry::with_defaults())?;
    let analysis = service
        .analyze(&AnalysisRequest {
            image_paths: inputs.images.clone(),
            audio_path: inputs.audio.clone(),
            symptoms_text: loaded.symptoms,
            report_text: loaded.report,
            transcript_segments: loaded.transcript,
            demo_context,
        })
        .await?;
    Ok(analysis)
}
