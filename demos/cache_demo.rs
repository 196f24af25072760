use clap::Parser;
use icco::{Engine, EntryType, Metadata};
use tracing_subscriber::EnvFilter;

/// Toy host loop exercising the cache engine: feeds it a stream of
/// synthetic file reads and tool results, then drives user prompts to show
/// scoring and pruning in action.
#[derive(Parser, Debug)]
struct Args {
    /// Context window size in tokens, small enough to trigger pruning.
    #[arg(long, default_value_t = 2_000)]
    window: u32,

    /// How many synthetic tool-result entries to add before prompting.
    #[arg(long, default_value_t = 40)]
    entries: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = icco::EngineConfig::default();
    config.context_window_size = args.window;

    let mut engine = Engine::builder()
        .with_config(config)
        .build()
        .expect("valid config");

    engine.add(
        "You are a coding assistant. Be concise and careful.",
        EntryType::SystemPrompt,
        Metadata::default(),
    );

    for i in 0..args.entries {
        let metadata = Metadata {
            source: Some("bash".into()),
            tool_name: Some("run_tests".into()),
            ..Default::default()
        };
        engine.add(
            &format!("test run #{i} passed 12/12 in 0.4s"),
            EntryType::ToolResult,
            metadata,
        );
    }

    println!("utilization before prompt: {:.2}", engine.get_utilization());

    let result = engine.on_user_prompt_submit("why did the login test fail?", None);
    println!(
        "prune result: level={} removed={} compressed={} freed={}",
        result.level_name, result.entries_removed, result.entries_compressed, result.tokens_freed
    );

    println!("utilization after prompt: {:.2}", engine.get_utilization());
    println!("entries remaining: {}", engine.get_entries().count());
}
