//! Console presentation: timestamped sink output and throttled relay of
//! tailed engine log lines.

use boxwarden_engine::engine::{EngineControl, LogSink};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Engine lines shown per relay tick before summarising.
pub const MAX_ENGINE_LINES_PER_TICK: usize = 2;

/// Prints every message as `[HH:MM:SS] message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&self, message: &str) {
        println!("{}", format_entry(Local::now(), message));
    }
}

pub fn format_entry(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), message)
}

/// Keep the first `max` lines and fold the rest into one summary line.
pub fn throttle(mut lines: Vec<String>, max: usize, engine_name: &str) -> Vec<String> {
    if lines.len() <= max {
        return lines;
    }
    let hidden = lines.len() - max;
    lines.truncate(max);
    lines.push(format!("[{} more {} messages...]", hidden, engine_name));
    lines
}

/// Drain tailed lines every `period` and print them, throttled.
pub async fn relay_engine_logs(
    control: Arc<dyn EngineControl>,
    engine_name: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let lines = control.drain_logs().await;
        for line in throttle(lines, MAX_ENGINE_LINES_PER_TICK, &engine_name) {
            println!("{}", line);
        }
    }
}
