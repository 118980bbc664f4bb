use sqlbridge::{load_config, Database, DatabaseConfig, ExecuteOptions, Result, SqliteClient};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sqlbridge [--config PATH] [--server NAME] [--server-version] [SQL...]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    server: Option<String>,
    server_version: bool,
    sql: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> std::result::Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(args.next().ok_or("--config needs a path")?.into()),
            "--server" => parsed.server = Some(args.next().ok_or("--server needs a name")?),
            "--server-version" => parsed.server_version = true,
            "-h" | "--help" => return Err(String::new()),
            _ => parsed.sql.push(arg),
        }
    }
    Ok(parsed)
}

fn resolve_config(explicit: Option<PathBuf>) -> Result<DatabaseConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match dirs::config_dir().map(|dir| dir.join("sqlbridge").join("config.toml")) {
        Some(path) if path.exists() => {
            info!("Using configuration at {:?}", path);
            load_config(path)
        }
        _ => Ok(DatabaseConfig::default()),
    }
}

/// Runs one statement and prints its rows tab-separated, header first.
fn run_statement(db: &Database<SqliteClient>, opts: &ExecuteOptions, sql: &str, out: &mut impl Write) -> Result<()> {
    db.execute_with(sql, opts, |cursor| {
        let columns = cursor.columns()?.to_vec();
        if columns.is_empty() {
            cursor.materialize()?;
            writeln!(out, "OK")?;
            return Ok(());
        }
        writeln!(out, "{}", columns.join("\t"))?;
        for row in cursor.rows() {
            let row = row?;
            let line: Vec<String> = row.iter().map(|value| value.to_string()).collect();
            writeln!(out, "{}", line.join("\t"))?;
        }
        Ok(())
    })
}

fn run(args: Args) -> Result<()> {
    let config = resolve_config(args.config)?;
    let db = Database::new(SqliteClient::new(), config);
    let opts = ExecuteOptions::on(args.server.as_deref());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.server_version {
        writeln!(out, "{}", db.server_version(args.server.as_deref())?)?;
    }

    if !args.sql.is_empty() {
        return run_statement(&db, &opts, &args.sql.join(" "), &mut out);
    }
    if args.server_version {
        return Ok(());
    }

    for line in io::stdin().lock().lines() {
        let line = line?;
        let sql = line.trim();
        if sql.is_empty() {
            continue;
        }
        if let Err(e) = run_statement(&db, &opts, sql, &mut out) {
            error!("{}", e);
            eprintln!("{}", e);
        }
    }
    Ok(())
}

fn main() {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    info!("Starting sqlbridge...");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("{}", msg);
            }
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
