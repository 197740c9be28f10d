//! Gridline console runtime.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gridline_application::{
    DataSourceMode, DataTableController, ListParams, RecordGateway, TableControllerConfig,
    UploadQueue, UploadQueueConfig,
};
use gridline_core::{ActorContext, AppError, AppResult};
use gridline_domain::{ChangeId, FilterState, PageState, Record, RecordId, SortState, TableRecord, UploadFile};
use gridline_infrastructure::{HttpRecordGateway, HttpUploadTransport, TracingNoticeSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: gridline-console <list [query] [page] | history [limit] | delete <id> | restore <change_id> | upload <file>...>";

#[derive(Debug, Clone)]
struct ConsoleConfig {
    api_base_url: String,
    resource: String,
    user: String,
    id_field: String,
    search_fields: Vec<String>,
    page_size: usize,
    client_side_row_limit: usize,
    upload_endpoint: String,
    upload_concurrency: usize,
    upload_extensions: Vec<String>,
    upload_fields: BTreeMap<String, String>,
    http_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TableCommand {
    List { query: Option<String>, page: usize },
    History { limit: usize },
    Delete { id: RecordId },
    Restore { change_id: ChangeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Table(TableCommand),
    Upload { paths: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    let config = ConsoleConfig::load()?;
    let actor = ActorContext::new(config.user.as_str(), None)?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    info!(
        api_base_url = %config.api_base_url,
        resource = %config.resource,
        user = %actor.subject(),
        "gridline-console started"
    );

    match command {
        Command::Table(command) => run_table_command(&config, http_client, actor, command).await,
        Command::Upload { paths } => run_upload(&config, http_client, actor, &paths).await,
    }
}

async fn run_table_command(
    config: &ConsoleConfig,
    http_client: reqwest::Client,
    actor: ActorContext,
    command: TableCommand,
) -> AppResult<()> {
    let gateway: Arc<dyn RecordGateway<Record>> = Arc::new(HttpRecordGateway::new(
        http_client,
        config.api_base_url.as_str(),
        config.resource.as_str(),
        config.id_field.as_str(),
        actor.clone(),
    )?);
    let mode = detect_mode(gateway.as_ref(), config.client_side_row_limit).await?;
    info!(resource = %config.resource, mode = mode.as_str(), "data source mode selected");

    let mut controller = DataTableController::new(
        gateway,
        Arc::new(TracingNoticeSink::new(config.resource.as_str())),
        actor,
        TableControllerConfig {
            resource_label: config.resource.clone(),
            mode,
            required_fields: Vec::new(),
        },
        FilterState::searching(config.search_fields.iter().cloned()),
        SortState::unsorted(),
        PageState::new(config.page_size)?,
    );

    match command {
        TableCommand::List { query, page } => {
            if let Some(query) = query {
                controller.set_query(query);
            }
            controller.set_page(page);
            controller.refresh().await?;

            let window = controller.view();
            for row in &window.rows {
                println!("{}", row.to_json());
            }
            info!(
                page = window.page,
                total_pages = window.total_pages,
                total_count = window.total_count,
                "page loaded"
            );
        }
        TableCommand::History { limit } => {
            for entry in controller.history(limit).await? {
                let line = serde_json::to_string(&entry).map_err(|error| {
                    AppError::Internal(format!("failed to encode change entry: {error}"))
                })?;
                println!("{line}");
            }
        }
        TableCommand::Delete { id } => {
            controller.refresh().await?;
            let outcome = controller.delete(&id).await?;
            match outcome.undo {
                Some(offer) => println!(
                    "deleted {} (restore with change id {} until {})",
                    outcome.id,
                    offer.change_id(),
                    offer.expires_at().to_rfc3339()
                ),
                None => println!("deleted {}", outcome.id),
            }
        }
        TableCommand::Restore { change_id } => {
            let id = controller.restore(change_id).await?;
            println!("restored {id}");
        }
    }

    Ok(())
}

async fn run_upload(
    config: &ConsoleConfig,
    http_client: reqwest::Client,
    actor: ActorContext,
    paths: &[String],
) -> AppResult<()> {
    let transport = Arc::new(HttpUploadTransport::new(
        http_client,
        config.upload_endpoint.as_str(),
    )?);
    let queue = UploadQueue::new(
        transport,
        Arc::new(TracingNoticeSink::new("uploads")),
        actor,
        UploadQueueConfig {
            concurrency: config.upload_concurrency,
            allowed_extensions: config.upload_extensions.clone(),
            form_fields: config.upload_fields.clone(),
        },
    );

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path).await.map_err(|error| {
            AppError::Validation(format!("cannot read '{path}': {error}"))
        })?;
        let file_name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path.as_str());
        files.push(UploadFile::new(
            file_name,
            content_type_for(file_name).map(str::to_owned),
            data,
        )?);
    }

    let outcome = queue.enqueue(files);
    if outcome.queued.is_empty() {
        return Err(AppError::Validation("no files were queued".to_owned()));
    }

    let stopper = tokio::spawn({
        let queue = queue.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(aborted = queue.stop_all(), "upload run interrupted");
            }
        }
    });
    let summary = queue.run().await;
    stopper.abort();
    let summary = summary?;

    for item in queue.snapshot() {
        let receipt = item.receipt().map(ToString::to_string).unwrap_or_default();
        let error = item.error().unwrap_or_default();
        println!(
            "{}\t{}\t{}%\t{receipt}{error}",
            item.file().file_name(),
            item.status().as_str(),
            item.progress()
        );
    }

    if summary.failed > 0 {
        return Err(AppError::Internal(format!(
            "{} of {} uploads failed",
            summary.failed,
            outcome.queued.len()
        )));
    }

    Ok(())
}

async fn detect_mode(
    gateway: &dyn RecordGateway<Record>,
    client_side_row_limit: usize,
) -> AppResult<DataSourceMode> {
    let probe = ListParams {
        page: Some(1),
        page_size: Some(1),
        ..ListParams::full_collection()
    };
    let total = gateway.list(&probe).await?.total;
    Ok(DataSourceMode::for_expected_rows(total, client_side_row_limit))
}

impl Command {
    fn parse(args: &[String]) -> AppResult<Self> {
        let usage = || AppError::Validation(USAGE.to_owned());
        let (name, rest) = args.split_first().ok_or_else(usage)?;

        match name.as_str() {
            "list" => {
                let query = rest.first().cloned().filter(|query| !query.trim().is_empty());
                let page = match rest.get(1) {
                    Some(page) => page.parse::<usize>().map_err(|error| {
                        AppError::Validation(format!("invalid page '{page}': {error}"))
                    })?,
                    None => 1,
                };
                Ok(Self::Table(TableCommand::List { query, page }))
            }
            "history" => {
                let limit = match rest.first() {
                    Some(limit) => limit.parse::<usize>().map_err(|error| {
                        AppError::Validation(format!("invalid limit '{limit}': {error}"))
                    })?,
                    None => 100,
                };
                Ok(Self::Table(TableCommand::History { limit }))
            }
            "delete" => {
                let id = rest.first().ok_or_else(usage)?;
                Ok(Self::Table(TableCommand::Delete { id: parse_id(id)? }))
            }
            "restore" => {
                let change_id = rest.first().ok_or_else(usage)?;
                let change_id = change_id.parse::<i64>().map_err(|error| {
                    AppError::Validation(format!("invalid change id '{change_id}': {error}"))
                })?;
                Ok(Self::Table(TableCommand::Restore {
                    change_id: ChangeId::new(change_id),
                }))
            }
            "upload" if !rest.is_empty() => Ok(Self::Upload {
                paths: rest.to_vec(),
            }),
            _ => Err(usage()),
        }
    }
}

impl ConsoleConfig {
    fn load() -> AppResult<Self> {
        let api_base_url = required_env("GRIDLINE_API_BASE_URL")?
            .trim_end_matches('/')
            .to_owned();
        let resource = required_env("GRIDLINE_RESOURCE")?
            .trim_matches('/')
            .to_owned();
        let user = env::var("GRIDLINE_USER")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "guest".to_owned());
        let id_field = env::var("GRIDLINE_ID_FIELD").unwrap_or_else(|_| "id".to_owned());
        let search_fields = parse_list(env::var("GRIDLINE_SEARCH_FIELDS").unwrap_or_default().as_str());
        let page_size = parse_env_usize("GRIDLINE_PAGE_SIZE", 25)?;
        let client_side_row_limit = parse_env_usize(
            "GRIDLINE_CLIENT_SIDE_ROW_LIMIT",
            gridline_application::DEFAULT_CLIENT_SIDE_ROW_LIMIT,
        )?;
        let upload_endpoint = env::var("GRIDLINE_UPLOAD_ENDPOINT")
            .unwrap_or_else(|_| format!("{api_base_url}/upload"));
        let upload_concurrency = parse_env_usize(
            "GRIDLINE_UPLOAD_CONCURRENCY",
            gridline_application::DEFAULT_UPLOAD_CONCURRENCY,
        )?;
        let upload_extensions =
            parse_list(env::var("GRIDLINE_UPLOAD_EXTENSIONS").unwrap_or_default().as_str());
        let upload_fields =
            parse_pairs(env::var("GRIDLINE_UPLOAD_FIELDS").unwrap_or_default().as_str())?;
        let http_timeout_secs = parse_env_u64("GRIDLINE_HTTP_TIMEOUT_SECS", 30)?;

        if resource.is_empty() {
            return Err(AppError::Validation(
                "GRIDLINE_RESOURCE must not be empty".to_owned(),
            ));
        }

        if upload_concurrency == 0 {
            return Err(AppError::Validation(
                "GRIDLINE_UPLOAD_CONCURRENCY must be greater than zero".to_owned(),
            ));
        }

        if http_timeout_secs == 0 {
            return Err(AppError::Validation(
                "GRIDLINE_HTTP_TIMEOUT_SECS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            api_base_url,
            resource,
            user,
            id_field,
            search_fields,
            page_size,
            client_side_row_limit,
            upload_endpoint,
            upload_concurrency,
            upload_extensions,
            upload_fields,
            http_timeout_secs,
        })
    }
}

fn parse_id(raw: &str) -> AppResult<RecordId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation("record id must not be empty".to_owned()));
    }

    Ok(raw
        .parse::<i64>()
        .map(RecordId::Number)
        .unwrap_or_else(|_| RecordId::Text(raw.to_owned())))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_pairs(raw: &str) -> AppResult<BTreeMap<String, String>> {
    parse_list(raw)
        .into_iter()
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                AppError::Validation(format!("invalid GRIDLINE_UPLOAD_FIELDS entry '{pair}'"))
            })?;
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}

fn content_type_for(file_name: &str) -> Option<&'static str> {
    mime_guess::from_path(file_name).first_raw()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
