mod suggester;

use annotation_core::schema::{Annotation, AnnotationStatus, Span, Vote, VoteChoice};
use annotation_core::{
    AnnotationEngine, AnnotationFilter, Decision, EngineConfig, EntitySuggester, NewAnnotation,
    SqliteStore, Tally,
};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use schemars::schema_for;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::suggester::{CommandSuggester, FileSuggester};

#[derive(Parser)]
#[command(name = "annot")]
#[command(about = "Collaborative annotation consensus CLI", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "ANNOT_DB", default_value = "annotations.db", global = true)]
    db: PathBuf,

    /// Engine configuration (.toml or .yaml)
    #[arg(long, env = "ANNOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage documents
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Create and inspect annotations
    Ann {
        #[command(subcommand)]
        command: AnnCommands,
    },
    /// Approve or reject an annotation
    Vote {
        annotation_id: String,
        #[arg(value_enum)]
        choice: ChoiceArg,
        /// Voter identity
        #[arg(long)]
        by: String,
    },
    /// Fetch NER suggestions for a document and optionally accept some
    Suggest {
        #[arg(long)]
        doc: String,
        /// Program that reads text on stdin and prints a JSON suggestion array
        #[arg(long, conflicts_with = "from_file", required_unless_present = "from_file")]
        command: Option<String>,
        /// JSON file holding a suggestion array
        #[arg(long)]
        from_file: Option<PathBuf>,
        /// Indexes of suggestions to accept, e.g. 0,2
        #[arg(long, value_delimiter = ',')]
        accept: Vec<usize>,
        #[arg(long, conflicts_with = "accept")]
        accept_all: bool,
        /// Annotator recorded on accepted suggestions
        #[arg(long)]
        by: Option<String>,
    },
    /// Annotation counts by status, label and annotator
    Stats {
        #[arg(long)]
        doc: Option<String>,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum DocCommands {
    /// Store a new document
    Add {
        #[arg(long)]
        title: String,
        /// Read content from a file
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Inline content
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        by: String,
    },
    /// List documents
    List {
        /// Include archived documents
        #[arg(long)]
        all: bool,
    },
    Show {
        id: String,
    },
    Archive {
        id: String,
    },
}

#[derive(Subcommand)]
enum AnnCommands {
    /// Add a manual annotation
    Add {
        #[arg(long)]
        doc: String,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
        #[arg(long)]
        label: String,
        #[arg(long)]
        by: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List annotations, optionally filtered
    List {
        #[arg(long)]
        doc: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        by: Option<String>,
    },
    /// Show an annotation with its votes and tally
    Show {
        id: String,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChoiceArg {
    Approve,
    Reject,
}

impl From<ChoiceArg> for VoteChoice {
    fn from(value: ChoiceArg) -> Self {
        match value {
            ChoiceArg::Approve => VoteChoice::Approve,
            ChoiceArg::Reject => VoteChoice::Reject,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Approved,
    Rejected,
}

impl From<StatusArg> for AnnotationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => AnnotationStatus::Pending,
            StatusArg::Approved => AnnotationStatus::Approved,
            StatusArg::Rejected => AnnotationStatus::Rejected,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = || open_engine(&cli.db, cli.config.as_deref());

    match cli.command {
        Commands::Doc { command } => doc(&engine()?, command),
        Commands::Ann { command } => ann(&engine()?, command),
        Commands::Vote {
            annotation_id,
            choice,
            by,
        } => print_json(&engine()?.votes().cast_vote(&annotation_id, &by, choice.into())?),
        Commands::Suggest {
            doc,
            command,
            from_file,
            accept,
            accept_all,
            by,
        } => {
            let suggester: Box<dyn EntitySuggester> = match (command, from_file) {
                (Some(command), _) => Box::new(CommandSuggester::parse(&command)?),
                (None, Some(path)) => Box::new(FileSuggester::new(path)),
                (None, None) => bail!("either --command or --from-file is required"),
            };
            suggest(&engine()?, &doc, suggester.as_ref(), &accept, accept_all, by)
        }
        Commands::Stats { doc } => {
            let engine = engine()?;
            let stats = match doc {
                Some(id) => engine.stats().for_document(&id)?,
                None => engine.stats().summary()?,
            };
            print_json(&stats)
        }
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn open_engine(db: &Path, config: Option<&Path>) -> Result<AnnotationEngine<SqliteStore>> {
    let config = match config {
        Some(path) => {
            debug!(path = %path.display(), "loading engine config");
            EngineConfig::load_from_path(path)?
        }
        None => EngineConfig::default(),
    };
    let store = SqliteStore::open(db, &config.store)?;
    debug!(db = %db.display(), "store opened");
    Ok(AnnotationEngine::new(store, config))
}

fn doc(engine: &AnnotationEngine<SqliteStore>, command: DocCommands) -> Result<()> {
    let registry = engine.registry();
    match command {
        DocCommands::Add {
            title,
            file,
            text,
            by,
        } => {
            let content = match (file, text) {
                (Some(path), _) => fs::read_to_string(path)?,
                (None, Some(text)) => text,
                (None, None) => bail!("either --file or --text is required"),
            };
            print_json(&registry.create_document(&title, &content, &by)?)
        }
        DocCommands::List { all } => {
            for d in registry.list_documents(all)? {
                println!("{}\t{}\t{}\t{}", d.id, d.status, d.created_by, d.title);
            }
            Ok(())
        }
        DocCommands::Show { id } => print_json(&registry.get_document(&id)?),
        DocCommands::Archive { id } => print_json(&registry.archive_document(&id)?),
    }
}

fn ann(engine: &AnnotationEngine<SqliteStore>, command: AnnCommands) -> Result<()> {
    let registry = engine.registry();
    match command {
        AnnCommands::Add {
            doc,
            start,
            end,
            label,
            by,
            confidence,
            notes,
        } => {
            let mut new =
                NewAnnotation::manual(Span::new(start, end), label, by).with_confidence(confidence);
            if let Some(notes) = notes {
                new = new.with_notes(notes);
            }
            print_json(&registry.create(&doc, new)?)
        }
        AnnCommands::List {
            doc,
            status,
            label,
            by,
        } => {
            let filter = AnnotationFilter {
                document_id: doc,
                status: status.map(Into::into),
                label,
                annotator: by,
            };
            for a in registry.list_all(&filter)? {
                println!(
                    "{}\t{}\t{}..{}\t{}\t{}\t{}",
                    a.id, a.status, a.span.start, a.span.end, a.label, a.annotator, a.text
                );
            }
            Ok(())
        }
        AnnCommands::Show { id } => {
            #[derive(Serialize)]
            struct Detail {
                annotation: Annotation,
                tally: Tally,
                votes: Vec<Vote>,
            }
            let annotation = registry.get(&id)?;
            let votes = engine.votes().votes_for(&id)?;
            let tally = Tally::from_votes(&votes);
            print_json(&Detail {
                annotation,
                tally,
                votes,
            })
        }
    }
}

fn suggest(
    engine: &AnnotationEngine<SqliteStore>,
    document_id: &str,
    suggester: &dyn EntitySuggester,
    accept: &[usize],
    accept_all: bool,
    by: Option<String>,
) -> Result<()> {
    let ingestor = engine.suggestions();
    let suggestions = ingestor.request(document_id, suggester)?;

    if accept.is_empty() && !accept_all {
        for (i, s) in suggestions.iter().enumerate() {
            println!("{i}\t{}..{}\t{}\t{}", s.start, s.end, s.label, s.text);
        }
        return Ok(());
    }

    let Some(annotator) = by else {
        bail!("--by is required when accepting suggestions");
    };
    if let Some(bad) = accept.iter().find(|&&i| i >= suggestions.len()) {
        bail!("no suggestion at index {bad} ({} available)", suggestions.len());
    }
    let decisions = suggestions.into_iter().enumerate().map(|(i, s)| {
        let decision = if accept_all || accept.contains(&i) {
            Decision::Accept
        } else {
            Decision::Reject
        };
        (s, decision)
    });
    let report = ingestor.review(document_id, &annotator, decisions)?;
    info!(
        document_id,
        accepted = report.accepted.len(),
        rejected = report.rejected,
        "suggestions reviewed"
    );
    print_json(&report)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("Document", schema_for!(annotation_core::schema::Document)),
        ("Annotation", schema_for!(annotation_core::schema::Annotation)),
        ("Vote", schema_for!(annotation_core::schema::Vote)),
        ("Suggestion", schema_for!(annotation_core::schema::Suggestion)),
        ("AnnotationStats", schema_for!(annotation_core::AnnotationStats)),
        ("VoteOutcome", schema_for!(annotation_core::VoteOutcome)),
    ];
    let schemas_len = schemas.len();
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    info!(count = schemas_len, out_dir = %out_dir.display(), "schemas exported");
    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
