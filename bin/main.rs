use anyhow::Result;
use chrono::Local;
use std::io::Write;
use std::time::Duration;
use xrelay::http_flv;
use xrelay::metrics::get_global_metrics;
use xrelay::Manager;

#[tokio::main]
async fn main() -> Result<()> {
    let config = xrelay::config::get_setting();

    let env =
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &config.log.level);
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                &record.args()
            )
        })
        .init();

    match &config.upstream {
        Some(upstream) => log::info!("missing streams are pulled from {}", upstream),
        None => log::info!("no upstream configured, serving local streams only"),
    }

    let mut handles = Vec::new();

    let manager = Manager::new(&config);
    let manager_handle = manager.handle();
    handles.push(tokio::spawn(manager.run()));

    if config.metrics.interval > 0 {
        let period = Duration::from_secs(config.metrics.interval);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match serde_json::to_string(&get_global_metrics().snapshot()) {
                    Ok(line) => log::info!("metrics {}", line),
                    Err(e) => log::error!("Failed to serialize metrics: {}", e),
                }
            }
        }));
    }

    let port = config.http.port;
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_flv::Service::new(manager_handle).run(port).await {
            log::error!("http-flv service stopped: {}", e);
        }
    }));

    for handle in handles {
        handle.await?;
    }
    Ok(())
}
