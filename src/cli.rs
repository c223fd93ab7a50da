use std::sync::Arc;

use nanoindex::config::Config;
use nanoindex::search::SearchEngine;

#[derive(Debug)]
pub enum Command {
    Serve,
    Stats,
}

pub fn parse_command() -> Command {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        return Command::Serve;
    }
    match args[1].as_str() {
        "stats" => Command::Stats,
        _ => Command::Serve,
    }
}

pub fn run_stats(engine: &Arc<SearchEngine>, config: &Config) -> anyhow::Result<()> {
    let stats = engine.stats();
    let agent = engine.agent_stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "data_dir": config.data_dir,
            "store": stats.store,
            "index": stats.index,
            "agent": agent,
        }))?
    );
    Ok(())
}
