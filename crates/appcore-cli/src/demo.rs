//! Demo - `appcore` バイナリがマウントするデモ用プラグイン

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use appcore_core::{AppFactory, Application, EventKind, Failure, Phase, Plugin};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WarmupOptions {
    #[serde(default)]
    delay_ms: u64,
}

/// startup 以降にホストが通った状態遷移を数え、`stats.transitions` に公開する
pub fn hit_counter() -> Plugin {
    Plugin::hook(|app| {
        let hits = Rc::new(Cell::new(0u64));
        app.on(EventKind::State, move |app, event| {
            hits.set(hits.get() + 1);
            app.set("stats.transitions", json!(hits.get()))?;
            tracing::debug!(app = %app.fullname(), phase = ?event.phase(), hits = hits.get(), "state hit");
            Ok(())
        });
        Ok(())
    })
}

/// `warmup.delayMs` ミリ秒の間ホストを STARTUP に留める
pub fn warmup() -> Plugin {
    Plugin::hook(|app| {
        let options: WarmupOptions = app.get_as("warmup")?.unwrap_or_default();
        let delay = Duration::from_millis(options.delay_ms);
        let done = app.wait();

        tracing::info!(app = %app.fullname(), delay_ms = options.delay_ms, "warming up");
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            done.release();
        });
        Ok(())
    })
}

/// ホストが `phase` に達したらエラーを報告する
pub fn fail_at(app: &Application, phase: Phase) {
    app.on_state(phase, move |app| {
        app.error(Failure::msg(format!("failure requested at {phase}")))?;
        Ok(())
    });
}

/// 入れ子の "worker" アプリケーションの factory
pub fn worker_factory() -> AppFactory {
    AppFactory::named("worker", |app, options: &Value| {
        app.set("", options.clone())?;
        app.defaults("threads", json!(1))?;
        app.ready(|app| {
            tracing::info!(
                app = %app.fullname(),
                threads = %app.get("threads"),
                env = ?app.env(),
                "worker ready"
            );
            Ok(())
        });
        Ok(())
    })
}
