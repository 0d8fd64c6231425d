use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pk_arena::cli::{exit, Cli, Command};
use pk_arena::{load_suite, LoadedSuite, Scheduler, StateStore};
use pk_domain::Error;
use pk_hooks::{BannedWordsHook, HookRegistry, LengthHook, MaxSentencesHook, RequiredFieldsHook};
use pk_providers::ProviderRegistry;
use pk_report::{
    CompositeResultRepository, HtmlRepository, JsonRepository, JunitRepository,
    MarkdownRepository, ResultRepository,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let code = match cli.command {
        Command::Validate { config } => validate(&config),
        Command::Run {
            config,
            scenario,
            provider,
            mock_provider,
            concurrency,
            format,
            out,
        } => {
            run(
                &config,
                scenario.as_deref(),
                provider.as_deref(),
                mock_provider,
                concurrency,
                format,
                out,
            )
            .await
        }
    };
    ExitCode::from(code as u8)
}

fn validate(config: &PathBuf) -> i32 {
    match load_suite(config) {
        Ok(suite) => {
            println!(
                "{}: ok ({} providers, {} scenarios)",
                suite.name,
                suite.providers.len(),
                suite.scenarios.len()
            );
            exit::OK
        }
        Err(e) => {
            eprintln!("validation failed: {e}");
            exit::CONFIG_ERROR
        }
    }
}

fn build_hooks(suite: &LoadedSuite) -> HookRegistry {
    let guardrails = &suite.defaults.guardrails;
    let mut hooks = HookRegistry::new();
    if !guardrails.banned_words.is_empty() {
        hooks.register(Arc::new(BannedWordsHook::new(guardrails.banned_words.clone())));
    }
    if guardrails.max_chars > 0 || guardrails.max_tokens > 0 {
        hooks.register(Arc::new(LengthHook::new(
            guardrails.max_chars,
            guardrails.max_tokens,
        )));
    }
    if let Some(max) = guardrails.max_sentences {
        hooks.register(Arc::new(MaxSentencesHook::new(max)));
    }
    if !guardrails.required_fields.is_empty() {
        hooks.register(Arc::new(RequiredFieldsHook::new(
            guardrails.required_fields.clone(),
        )));
    }
    hooks
}

fn build_repositories(formats: &[String], out_dir: &PathBuf) -> CompositeResultRepository {
    let mut children: Vec<Box<dyn ResultRepository>> = Vec::new();
    for format in formats {
        match format.as_str() {
            "json" => children.push(Box::new(JsonRepository::new(out_dir))),
            "markdown" => children.push(Box::new(MarkdownRepository::new(out_dir))),
            "junit" => children.push(Box::new(JunitRepository::new(out_dir))),
            "html" => children.push(Box::new(HtmlRepository::new(out_dir))),
            other => tracing::warn!(format = other, "skipping unknown result format"),
        }
    }
    CompositeResultRepository::new(children)
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &PathBuf,
    scenario: Option<&str>,
    provider: Option<&str>,
    mock_provider: bool,
    concurrency: Option<usize>,
    format: Vec<String>,
    out: Option<PathBuf>,
) -> i32 {
    let mut suite = match load_suite(config) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return exit::CONFIG_ERROR;
        }
    };
    if let Err(e) = suite.filter(scenario, provider) {
        eprintln!("configuration error: {e}");
        return exit::CONFIG_ERROR;
    }
    if let Some(n) = concurrency {
        suite.defaults.concurrency = n;
    }
    if !format.is_empty() {
        suite.defaults.formats = format;
    }
    if let Some(dir) = out {
        suite.defaults.output = dir;
    }

    let providers = match ProviderRegistry::from_specs(&suite.providers, mock_provider) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return exit::CONFIG_ERROR;
        }
    };

    let out_dir = suite.defaults.output.clone();
    let formats = suite.defaults.formats.clone();
    let hooks = build_hooks(&suite);
    let started = std::time::Instant::now();

    let scheduler = Scheduler::new(suite, providers, StateStore::at(&out_dir)).with_hooks(hooks);

    // Ctrl-C cancels the whole matrix; runs unwind and seal as cancelled.
    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling runs");
            cancel.cancel();
        }
    });

    let results = match scheduler.run_all().await {
        Ok(results) => results,
        Err(e) => {
            eprintln!("fatal: {e}");
            return exit::RUNTIME_ERROR;
        }
    };

    let summary = pk_domain::result::Summary::from_results(&results, started.elapsed());
    let repositories = build_repositories(&formats, &out_dir);
    if let Err(e) = repositories
        .save_results(&results)
        .and_then(|()| repositories.save_summary(&summary))
    {
        eprintln!("fatal: {e}");
        return exit::RUNTIME_ERROR;
    }

    let failed = results.iter().filter(|r| !r.passed()).count();
    println!(
        "{} runs, {} passed, {failed} failed — results in {}",
        results.len(),
        results.len() - failed,
        out_dir.display()
    );

    if results.iter().any(|r| {
        matches!(&r.error, Some(e) if e.contains(&Error::Cancelled.to_string()))
    }) && failed == results.len()
    {
        return exit::RUNTIME_ERROR;
    }
    if failed > 0 {
        exit::ASSERTIONS_FAILED
    } else {
        exit::OK
    }
}
