use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use query_core::{
    CompiledQuery, FieldDescriptor, PredicateCompiler, PredicateNode, QueryRequest, Schema,
    SortSpec,
};
use query_db::{DbHandle, SqlEngine, SqlParams, SqlTemplateLoader};
use runtime::{AppConfig, CliArgs};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};

/// QueryKit - sign, compile and run string-encoded query predicates
#[derive(Parser)]
#[command(name = "querykit-cli")]
#[command(about = "QueryKit - sign, compile and run string-encoded query predicates")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database DSN (overrides config)
    #[arg(long)]
    database_url: Option<String>,

    /// Development mode: skip request signature checks
    #[arg(long)]
    dev: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a signature to a request ("-" reads stdin)
    Sign { request: String },
    /// Check the signature of a request ("-" reads stdin)
    Verify { request: String },
    /// Compile a request against an entity schema (YAML or JSON)
    Compile {
        request: String,
        #[arg(short, long)]
        schema: PathBuf,
    },
    /// Render a SQL template with a JSON parameter object
    Render {
        id: String,
        #[arg(short, long)]
        params: Option<String>,
        /// Product-specific template directory, e.g. PostgreSQL
        #[arg(long)]
        product: Option<String>,
    },
    /// Run one page of a SQL template against the configured database
    Page {
        id: String,
        #[arg(short, long)]
        params: Option<String>,
        /// Sort string such as `name__desc,id`
        #[arg(long, default_value = "")]
        sort: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Page size; the configured default limit when absent
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Check configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        database_url: cli.database_url.clone(),
        dev_mode: cli.dev,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let base_dir = cli
        .config
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, &base_dir);
    tracing::debug!(dev_mode = config.query.dev_mode, "querykit-cli starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Sign { request } => sign(&config, &request),
        Commands::Verify { request } => verify(&config, &request),
        Commands::Compile { request, schema } => compile(&config, &request, &schema),
        Commands::Render {
            id,
            params,
            product,
        } => render(&config, &id, params.as_deref(), product.as_deref()),
        Commands::Page {
            id,
            params,
            sort,
            offset,
            limit,
        } => {
            let limit = limit.unwrap_or(config.query.default_limit);
            page(&config, &id, params.as_deref(), &sort, offset, limit).await
        }
        Commands::Check => check_config(&config),
    }
}

/// File contents, or stdin for "-".
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))
}

fn parse_params(raw: Option<&str>) -> Result<SqlParams> {
    let Some(raw) = raw else {
        return Ok(SqlParams::new());
    };
    let obj: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).context("Parameters must be a JSON object")?;
    Ok(SqlParams::from_json(obj))
}

fn sign(config: &AppConfig, source: &str) -> Result<()> {
    let req: QueryRequest =
        serde_json::from_str(&read_input(source)?).context("Malformed request JSON")?;
    req.validate()?;
    let signed = req.signed(&config.query.signature_guard());
    println!("{}", signed.to_json()?);
    Ok(())
}

fn verify(config: &AppConfig, source: &str) -> Result<()> {
    let guard = config.query.signature_guard();
    let req = QueryRequest::from_json(&read_input(source)?, &guard)?;
    tracing::info!(entity = %req.entity, "request signature accepted");
    println!("signature ok");
    Ok(())
}

fn load_schema(path: &Path) -> Result<Schema> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let schema = if is_json {
        serde_json::from_str(&text).context("Malformed JSON schema")?
    } else {
        serde_yaml::from_str(&text).context("Malformed YAML schema")?
    };
    Ok(schema)
}

fn compile(config: &AppConfig, source: &str, schema_path: &Path) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let guard = config.query.signature_guard();
    let req = QueryRequest::from_json(&read_input(source)?, &guard)?;
    let resolver = schema.resolver(&req.entity)?;
    let compiled = PredicateCompiler::new().compile(&req, &resolver)?;
    println!("{}", serde_json::to_string_pretty(&describe(&compiled))?);
    Ok(())
}

fn qualified(q: &CompiledQuery, field: &FieldDescriptor) -> String {
    if !field.path.is_nested() {
        return field.column.clone();
    }
    match q.aliases.get(field.path.first()) {
        Some(join) => format!("{}.{}", join.alias, field.column),
        None => field.column.clone(),
    }
}

fn node_text(q: &CompiledQuery, node: &PredicateNode) -> String {
    match node {
        PredicateNode::Compare { field, op, value } => {
            format!("{} {:?} {}", qualified(q, field), op, value)
        }
        PredicateNode::NullCheck { field, is_null } => {
            let check = if *is_null { "IS NULL" } else { "IS NOT NULL" };
            format!("{} {}", qualified(q, field), check)
        }
        PredicateNode::Or(children) => {
            let parts: Vec<String> = children.iter().map(|c| node_text(q, c)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}

/// Human-readable JSON summary of a compiled request.
fn describe(q: &CompiledQuery) -> serde_json::Value {
    let joins: Vec<_> = q
        .aliases
        .iter()
        .map(|j| json!({ "relation": j.relation, "alias": j.alias, "target": j.target }))
        .collect();
    let predicates: Vec<_> = q.nodes.iter().map(|n| node_text(q, n)).collect();
    let order: Vec<_> = q
        .order
        .iter()
        .map(|k| format!("{} {}", qualified(q, &k.field), if k.ascending { "ASC" } else { "DESC" }))
        .collect();
    json!({
        "entity": q.entity,
        "joins": joins,
        "predicates": predicates,
        "order": order,
        "offset": q.offset,
        "limit": q.limit,
    })
}

fn render(config: &AppConfig, id: &str, params: Option<&str>, product: Option<&str>) -> Result<()> {
    let loader = SqlTemplateLoader::from_config(&config.query.templates, product);
    let sql = loader.get_sql(id, &parse_params(params)?)?;
    println!("{sql}");
    Ok(())
}

async fn page(
    config: &AppConfig,
    id: &str,
    params: Option<&str>,
    sort: &str,
    offset: u64,
    limit: u64,
) -> Result<()> {
    let db_config = config
        .database
        .as_ref()
        .ok_or_else(|| anyhow!("Database URL not configured"))?;
    if db_config.url.trim().is_empty() {
        bail!("Database URL not configured");
    }
    let sort = SortSpec::parse(sort)?;
    let params = parse_params(params)?;

    let db = DbHandle::connect(db_config.url.trim(), db_config.connect_opts()).await?;
    let engine = SqlEngine::from_config(
        &config.query.templates,
        config.query.parse_cache_capacity,
        Some(db.engine().product_name()),
    );
    let result = engine.find_page(&db, id, &params, &sort, offset, limit).await;
    db.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}
