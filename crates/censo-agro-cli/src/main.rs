use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use censo_agro_api::CensoAgroApi;
use censo_agro_core::DatasetKind;
use censo_agro_store_sqlite::{NewReseller, ResellerUpdate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "censo")]
#[command(about = "Brazilian agricultural census analytics CLI")]
struct Cli {
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "./censo_agro.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Dataset {
        #[command(subcommand)]
        command: Box<DatasetCommand>,
    },
    Analysis {
        #[command(subcommand)]
        command: Box<AnalysisCommand>,
    },
    Overview,
    States,
    Municipality {
        #[command(subcommand)]
        command: Box<MunicipalityCommand>,
    },
    Reseller {
        #[command(subcommand)]
        command: Box<ResellerCommand>,
    },
    Export(ExportArgs),
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    Kinds,
    Categories(KindArgs),
    Table(TableArgs),
}

#[derive(Debug, Args)]
struct KindArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct TableArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    category: String,
    #[arg(long)]
    state: Option<String>,
}

#[derive(Debug, Subcommand)]
enum AnalysisCommand {
    Summary(TableArgs),
    ByState(TableArgs),
    Top(TopArgs),
    Compare(CompareArgs),
}

#[derive(Debug, Args)]
struct TopArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    category: String,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    a: String,
    #[arg(long)]
    b: String,
}

#[derive(Debug, Subcommand)]
enum MunicipalityCommand {
    Search(SearchArgs),
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    query: String,
}

#[derive(Debug, Subcommand)]
enum ResellerCommand {
    List,
    Show(ResellerIdArgs),
    Create(ResellerCreateArgs),
    Update(ResellerUpdateArgs),
    Delete(ResellerIdArgs),
    Territory(ResellerIdArgs),
}

#[derive(Debug, Args)]
struct ResellerIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct ResellerCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    cnpj: String,
    #[arg(long)]
    cnae: String,
    #[arg(long)]
    color: Option<String>,
    #[arg(long = "municipality")]
    municipalities: Vec<String>,
}

#[derive(Debug, Args)]
struct ResellerUpdateArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    cnae: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long = "municipality")]
    municipalities: Vec<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    category: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    state: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Crop,
    Fertilizer,
    Agrotoxic,
    Consultancy,
    Corrective,
    Expense,
    Education,
    Revenue,
}

impl KindArg {
    fn to_kind(self) -> DatasetKind {
        match self {
            Self::Crop => DatasetKind::Crop,
            Self::Fertilizer => DatasetKind::Fertilizer,
            Self::Agrotoxic => DatasetKind::Agrotoxic,
            Self::Consultancy => DatasetKind::Consultancy,
            Self::Corrective => DatasetKind::Corrective,
            Self::Expense => DatasetKind::Expense,
            Self::Education => DatasetKind::Education,
            Self::Revenue => DatasetKind::Revenue,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = CensoAgroApi::new(&cli.data_dir, cli.db.clone());

    match cli.command {
        Command::Dataset { command } => run_dataset(*command, &api),
        Command::Analysis { command } => run_analysis(*command, &api),
        Command::Overview => emit_json(serde_json::to_value(api.overview())?),
        Command::States => run_states(&api),
        Command::Municipality { command } => run_municipality(*command, &api),
        Command::Reseller { command } => run_reseller(*command, &api),
        Command::Export(args) => run_export(&args, &api),
    }
}

fn run_dataset(command: DatasetCommand, api: &CensoAgroApi) -> Result<()> {
    match command {
        DatasetCommand::Kinds => {
            let kinds = DatasetKind::ALL.iter().map(|kind| kind.as_str()).collect::<Vec<_>>();
            emit_json(serde_json::json!({ "kinds": kinds, "count": kinds.len() }))
        }
        DatasetCommand::Categories(args) => {
            let kind = args.kind.to_kind();
            let categories = api.categories(kind);
            emit_json(serde_json::json!({
                "kind": kind.as_str(),
                "count": categories.len(),
                "categories": categories
            }))
        }
        DatasetCommand::Table(args) => {
            let result =
                api.category_table(args.kind.to_kind(), &args.category, args.state.as_deref())?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_analysis(command: AnalysisCommand, api: &CensoAgroApi) -> Result<()> {
    match command {
        AnalysisCommand::Summary(args) => {
            let result = api.summary(args.kind.to_kind(), &args.category, args.state.as_deref())?;
            emit_json(serde_json::to_value(result)?)
        }
        AnalysisCommand::ByState(args) => {
            let result =
                api.by_state(args.kind.to_kind(), &args.category, args.state.as_deref())?;
            emit_json(serde_json::to_value(result)?)
        }
        AnalysisCommand::Top(args) => {
            let result = api.top(args.kind.to_kind(), &args.category, args.limit)?;
            emit_json(serde_json::to_value(result)?)
        }
        AnalysisCommand::Compare(args) => {
            let result = api.compare(args.kind.to_kind(), &args.a, &args.b)?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_states(api: &CensoAgroApi) -> Result<()> {
    let states = api.list_states();
    emit_json(serde_json::json!({
        "count": states.len(),
        "states": states
    }))
}

fn run_municipality(command: MunicipalityCommand, api: &CensoAgroApi) -> Result<()> {
    match command {
        MunicipalityCommand::Search(args) => {
            let results = api.search_municipalities(&args.query)?;
            emit_json(serde_json::json!({
                "query": args.query,
                "count": results.len(),
                "results": results
            }))
        }
    }
}

fn run_reseller(command: ResellerCommand, api: &CensoAgroApi) -> Result<()> {
    match command {
        ResellerCommand::List => {
            let resellers = api.list_resellers()?;
            emit_json(serde_json::json!({
                "count": resellers.len(),
                "resellers": resellers
            }))
        }
        ResellerCommand::Show(args) => {
            let reseller = api.get_reseller(args.id)?;
            emit_json(serde_json::to_value(reseller)?)
        }
        ResellerCommand::Create(args) => {
            let reseller = api.create_reseller(NewReseller {
                name: args.name,
                cnpj: args.cnpj,
                cnae: Some(args.cnae),
                color: args.color,
                municipalities: args.municipalities,
            })?;
            emit_json(serde_json::to_value(reseller)?)
        }
        ResellerCommand::Update(args) => {
            let municipalities =
                if args.municipalities.is_empty() { None } else { Some(args.municipalities) };
            let reseller = api.update_reseller(
                args.id,
                ResellerUpdate {
                    name: args.name,
                    cnae: args.cnae,
                    color: args.color,
                    municipalities,
                },
            )?;
            emit_json(serde_json::to_value(reseller)?)
        }
        ResellerCommand::Delete(args) => {
            api.delete_reseller(args.id)?;
            emit_json(serde_json::json!({ "id": args.id, "deleted": true }))
        }
        ResellerCommand::Territory(args) => {
            let territory = api.territory(args.id)?;
            emit_json(serde_json::to_value(territory)?)
        }
    }
}

fn run_export(args: &ExportArgs, api: &CensoAgroApi) -> Result<()> {
    let bundle = api.export(args.kind.to_kind(), &args.category, args.state.as_deref())?;
    fs::write(&args.out, &bundle.bytes)
        .with_context(|| format!("failed to write export file {}", args.out.display()))?;

    emit_json(serde_json::json!({
        "out": args.out,
        "filename": bundle.filename,
        "sha256": bundle.sha256,
        "bytes_written": bundle.bytes.len()
    }))
}
