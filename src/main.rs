use clap::{Parser, ValueEnum};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use vanity_lite::api::{
    JobStatusResponse, PoolQuery, PoolRefillResponse, PoolTakeResponse, SubmitResponse,
};
use vanity_lite::config::{
    PoolPair, RetryPolicy, SearchConfig, ServiceConfig, DEFAULT_PROGRAM_ID,
};
use vanity_lite::retry::poll_until;
use vanity_lite::scheduler::{JobStatus, Submission};
use vanity_lite::search::{
    select_engine, DerivationParams, PatternKind, SearchMode, SearchOutcome, SearchRequest,
};
use vanity_lite::service::Service;
use vanity_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "vanity-lite")]
#[command(version)]
#[command(about = "Vanity address search service with a job queue and warm pool")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP service with the scheduler and pool warmer
    Server(ServerArgs),

    /// Run one search locally, without a server
    Search(SearchArgs),

    /// Job commands against a running server
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Warm pool commands against a running server
    Pool {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: PoolCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address for the HTTP API
    #[arg(long, env = "VANITY_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Redis URL for the shared job store. In-process store when absent.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Accepted bearer tokens (comma-separated)
    #[arg(long = "token", env = "VANITY_TOKENS", value_delimiter = ',')]
    tokens: Vec<String>,

    /// Accept requests without a token. Development only.
    #[arg(long)]
    allow_anonymous: bool,

    /// Requests per submitter per minute
    #[arg(long, default_value = "30")]
    rate_limit: u32,

    /// Program that owns the derived addresses
    #[arg(long, env = "VANITY_PROGRAM_ID", default_value = DEFAULT_PROGRAM_ID)]
    program_id: String,

    // === Scheduler Options ===
    /// Global ceiling on concurrently running searches
    #[arg(long, default_value = "2")]
    max_concurrent: usize,

    /// Admission tick interval in milliseconds
    #[arg(long, default_value = "5000")]
    tick_ms: u64,

    /// Lifetime of an in-progress marker in seconds
    #[arg(long, default_value = "600")]
    marker_ttl_secs: u64,

    /// Always use the single-task search engine
    #[arg(long)]
    portable: bool,

    // === Pool Options ===
    /// Pairs to keep stocked (format: "requester:subject", repeatable)
    #[arg(long = "pool-pair")]
    pool_pairs: Vec<String>,

    /// Entries kept per pair
    #[arg(long, default_value = "20")]
    pool_target: usize,

    /// Refill below this many entries
    #[arg(long, default_value = "5")]
    pool_low_water: usize,

    /// Suffix every pooled address carries
    #[arg(long, default_value = "r")]
    pool_pattern: String,

    /// Most pairs kept stocked; further pairs are served on demand
    #[arg(long, default_value = "16")]
    pool_max_pairs: usize,

    /// Refills allowed to search at the same time
    #[arg(long, default_value = "1")]
    pool_refills: usize,
}

// =============================================================================
// Search Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SearchArgs {
    /// Requester key (base-58)
    #[arg(long)]
    requester: String,

    /// Subject key (base-58)
    #[arg(long)]
    subject: String,

    /// Pattern the rendered address must carry (case-insensitive)
    pattern: String,

    /// Match at the start instead of the end
    #[arg(long)]
    prefix: bool,

    /// Generate signing keys instead of derived addresses
    #[arg(long)]
    direct_key: bool,

    #[arg(long, default_value = "1000000")]
    max_attempts: u64,

    #[arg(long, env = "VANITY_PROGRAM_ID", default_value = DEFAULT_PROGRAM_ID)]
    program_id: String,

    /// Always use the single-task search engine
    #[arg(long)]
    portable: bool,

    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

// =============================================================================
// Client Arguments (shared by job and pool commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', env = "VANITY_ADDR", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Bearer token
    #[arg(long, env = "VANITY_TOKEN")]
    token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a search job
    Submit {
        #[arg(long)]
        requester: String,

        #[arg(long)]
        subject: String,

        /// Target pattern
        pattern: String,

        /// Job id to use instead of a generated one
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        max_attempts: Option<u64>,

        #[arg(long)]
        prefix: bool,

        #[arg(long)]
        direct_key: bool,
    },
    /// Get the status of a job
    Status { job_id: String },
    /// Poll a job until it finishes
    Wait {
        job_id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "2000")]
        interval_ms: u64,

        /// Give up after this many polls
        #[arg(long, default_value = "150")]
        max_polls: u32,
    },
}

// =============================================================================
// Pool Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum PoolCommands {
    /// Take a ready address for a pair
    Take {
        #[arg(long)]
        requester: String,

        #[arg(long)]
        subject: String,
    },
    /// Fill a pair's pool now and print its size
    Refill {
        #[arg(long)]
        requester: String,

        #[arg(long)]
        subject: String,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn search_mode(direct_key: bool) -> SearchMode {
    if direct_key {
        SearchMode::DirectKey
    } else {
        SearchMode::Derived
    }
}

fn pattern_kind(prefix: bool) -> PatternKind {
    if prefix {
        PatternKind::Prefix
    } else {
        PatternKind::Suffix
    }
}

fn parse_pool_pairs(pairs: &[String]) -> Vec<PoolPair> {
    pairs
        .iter()
        .filter_map(|pair| match pair.trim().split_once(':') {
            Some((requester, subject)) => Some(PoolPair::new(requester, subject)),
            None => {
                tracing::warn!(pair, "Invalid pool pair, expected requester:subject");
                None
            }
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_params(params: &DerivationParams) {
    match params {
        DerivationParams::Derived {
            seed,
            bump,
            state_address,
            state_bump,
        } => {
            println!("Seed:          {}", seed);
            println!("Bump:          {}", bump);
            println!("State Address: {}", state_address);
            println!("State Bump:    {}", state_bump);
        }
        DerivationParams::DirectKey { secret_key } => {
            println!("Secret Key:    {}", secret_key);
        }
    }
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn new(args: &ClientArgs) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: args.addr.trim_end_matches('/').to_string(),
            token: args.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Decode a success body, or print the server's error and exit.
    async fn decode<T: DeserializeOwned>(
        response: Response,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        eprintln!("Error ({}): {}", status, message);
        if let Some(secs) = retry_after {
            eprintln!("Hint: retry after {} seconds", secs);
        }
        std::process::exit(1);
    }

    async fn job(&self, job_id: &str) -> Result<Option<JobStatusResponse>, Box<dyn std::error::Error>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/jobs/{}", job_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::decode(response).await?))
    }
}

fn print_job(job: &JobStatusResponse, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => print_json(job)?,
        OutputFormat::Table => {
            println!("Job ID:        {}", job.job_id);
            println!("Status:        {}", job.status);
            println!("Submitted:     {}", job.submitted_at);
            if let Some(started) = job.started_at {
                println!("Started:       {}", started);
            }
            if let Some(completed) = job.completed_at {
                println!("Completed:     {}", completed);
            }
            if let Some(result) = &job.result {
                println!("Address:       {}", result.address);
                println!("Attempts:      {}", result.attempts);
                println!("Elapsed:       {} ms", result.elapsed_ms);
                print_params(&result.params);
            }
            if let Some(error) = &job.error {
                println!("Error:         {}", error);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = ServiceConfig::new(args.listen);
    config.redis_url = args.redis_url;
    config.gate.tokens = args.tokens.into_iter().filter(|t| !t.is_empty()).collect();
    config.gate.allow_anonymous = args.allow_anonymous;
    config.gate.requests_per_window = args.rate_limit;
    config.search.program_id = args.program_id;
    config.search.prefer_parallel = !args.portable;
    config.scheduler.max_concurrent = args.max_concurrent;
    config.scheduler.tick_interval_ms = args.tick_ms;
    config.scheduler.marker_ttl_secs = args.marker_ttl_secs;
    config.pool.pairs = parse_pool_pairs(&args.pool_pairs);
    config.pool.target = args.pool_target;
    config.pool.low_water = args.pool_low_water;
    config.pool.pattern = args.pool_pattern;
    config.pool.max_tracked_pairs = args.pool_max_pairs;
    config.pool.max_concurrent_refills = args.pool_refills;

    if config.gate.tokens.is_empty() && !config.gate.allow_anonymous {
        tracing::warn!("No tokens configured; every gated request will be rejected");
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        redis = config.redis_url.is_some(),
        max_concurrent = config.scheduler.max_concurrent,
        pool_pairs = config.pool.pairs.len(),
        "Starting vanity-lite"
    );

    let cancel = install_shutdown_handler();
    let service = Service::new(config).await?;
    service.run(cancel).await?;
    Ok(())
}

async fn run_search(args: SearchArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = SearchConfig {
        program_id: args.program_id.clone(),
        prefer_parallel: !args.portable,
        ..SearchConfig::default()
    };
    let engine = select_engine(&config);
    let request = SearchRequest {
        program_id: args.program_id,
        requester_key: args.requester,
        subject_key: args.subject,
        pattern: args.pattern,
        pattern_kind: pattern_kind(args.prefix),
        mode: search_mode(args.direct_key),
        max_attempts: args.max_attempts,
    };

    match engine.search(&request).await? {
        SearchOutcome::Found(m) => match args.output {
            OutputFormat::Json => print_json(&m)?,
            OutputFormat::Table => {
                println!("Address:       {}", m.address);
                println!("Attempts:      {}", m.attempts);
                print_params(&m.params);
            }
        },
        SearchOutcome::Exhausted { attempts } => {
            eprintln!("No match within {} attempts", attempts);
            std::process::exit(1);
        }
    }
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job(client_args: ClientArgs, command: JobCommands) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(&client_args);
    let output_format = &client_args.output;

    match command {
        JobCommands::Submit {
            requester,
            subject,
            pattern,
            id,
            max_attempts,
            prefix,
            direct_key,
        } => {
            let submission = Submission {
                job_id: id,
                requester_key: requester,
                subject_key: subject,
                target_pattern: pattern,
                max_attempts,
                pattern_kind: pattern_kind(prefix),
                mode: search_mode(direct_key),
            };
            let response = client
                .request(reqwest::Method::POST, "/api/jobs")
                .json(&submission)
                .send()
                .await?;
            let submitted: SubmitResponse = Client::decode(response).await?;
            match output_format {
                OutputFormat::Json => print_json(&submitted)?,
                OutputFormat::Table => {
                    println!("Job submitted successfully!");
                    println!("Job ID:     {}", submitted.job_id);
                    println!("Request ID: {}", submitted.request_id);
                }
            }
        }
        JobCommands::Status { job_id } => match client.job(&job_id).await? {
            Some(job) => print_job(&job, output_format)?,
            None => {
                eprintln!("Error: job {} not found", job_id);
                std::process::exit(1);
            }
        },
        JobCommands::Wait {
            job_id,
            interval_ms,
            max_polls,
        } => {
            let policy = RetryPolicy::fixed(max_polls, interval_ms);
            let (client, id) = (&client, job_id.as_str());
            let finished = poll_until(&policy, move || async move {
                let job = client.job(id).await?;
                Ok::<_, Box<dyn std::error::Error>>(job.filter(|job| job.status.is_terminal()))
            })
            .await?;
            match finished {
                Some(job) => {
                    print_job(&job, output_format)?;
                    if job.status == JobStatus::Failed {
                        std::process::exit(1);
                    }
                }
                None => {
                    eprintln!(
                        "Error: job {} not finished after {} polls ({:?} apart)",
                        job_id,
                        max_polls,
                        Duration::from_millis(interval_ms)
                    );
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn handle_pool(client_args: ClientArgs, command: PoolCommands) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(&client_args);
    let output_format = &client_args.output;

    match command {
        PoolCommands::Take { requester, subject } => {
            let query = PoolQuery {
                requester_key: requester,
                subject_key: subject,
            };
            let response = client
                .request(reqwest::Method::GET, "/api/pool")
                .query(&query)
                .send()
                .await?;
            let taken: PoolTakeResponse = Client::decode(response).await?;
            match output_format {
                OutputFormat::Json => print_json(&taken)?,
                OutputFormat::Table => {
                    println!("Address:       {}", taken.entry.address);
                    println!("Source:        {:?}", taken.source);
                    print_params(&taken.entry.params);
                }
            }
        }
        PoolCommands::Refill { requester, subject } => {
            let query = PoolQuery {
                requester_key: requester,
                subject_key: subject,
            };
            let response = client
                .request(reqwest::Method::PUT, "/api/pool")
                .json(&query)
                .send()
                .await?;
            let refilled: PoolRefillResponse = Client::decode(response).await?;
            match output_format {
                OutputFormat::Json => print_json(&refilled)?,
                OutputFormat::Table => println!("Pool size: {}", refilled.pool_size),
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Search(search_args) => run_search(search_args).await?,
        Commands::Job { client, command } => handle_job(client, command).await?,
        Commands::Pool { client, command } => handle_pool(client, command).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pool_pairs_skips_malformed() {
        let pairs = parse_pool_pairs(&["a:b".to_string(), "bad".to_string(), " c:d ".to_string()]);
        assert_eq!(pairs, vec![PoolPair::new("a", "b"), PoolPair::new("c", "d")]);
    }

    #[test]
    fn cli_parses_job_submit() {
        let args = Args::try_parse_from([
            "vanity-lite",
            "job",
            "-a",
            "http://localhost:9000",
            "submit",
            "--requester",
            "R",
            "--subject",
            "S",
            "ab",
            "--prefix",
        ])
        .unwrap();
        let Commands::Job { client, command } = args.command else {
            panic!("expected job command");
        };
        assert_eq!(client.addr, "http://localhost:9000");
        assert!(matches!(command, JobCommands::Submit { prefix: true, .. }));
    }

    #[test]
    fn cli_parses_server_tokens() {
        let args = Args::try_parse_from([
            "vanity-lite",
            "server",
            "--token",
            "a,b",
            "--pool-pair",
            "x:y",
        ])
        .unwrap();
        let Commands::Server(server) = args.command else {
            panic!("expected server command");
        };
        assert_eq!(server.tokens, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(server.pool_pairs, vec!["x:y".to_string()]);
    }
}
