//! Plancraft 命令行入口
//!
//! 用法：plancraft [--config <path>] <task description...>
//! 使用内置 Mock 推理模型与工具运行一个任务，并以 JSON 输出结果。

use std::path::PathBuf;

use anyhow::{bail, Context};
use plancraft::{core::EngineBuilder, load_config, observability, react::EngineEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config needs a path")?;
            config_path = Some(PathBuf::from(path));
        } else {
            words.push(arg);
        }
    }
    if words.is_empty() {
        bail!("usage: plancraft [--config <path>] <task description>");
    }
    let task = words.join(" ");

    let config = load_config(config_path).context("Failed to load config")?;
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<EngineEvent>();
    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                tracing::debug!(target: "plancraft::events", "{line}");
            }
        }
    });

    let engine = EngineBuilder::new(config).with_event_tx(event_tx).build();
    let result = engine.run_task(&task).await.context("Task run failed")?;
    drop(engine);
    let _ = printer.await;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );
    Ok(())
}
