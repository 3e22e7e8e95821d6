use gift_price_resolver::{Currency, PriceResolver, ResolverConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gift_price_resolver=info")),
        )
        .init();

    let mut names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        names = vec!["Happy Brownie".to_string(), "Lol Pop".to_string()];
    }

    let config = ResolverConfig::from_env()?;
    let timeout = config.resolve_timeout;
    let resolver = PriceResolver::from_config(config).await?;

    println!("Resolving {} subjects", names.len());
    println!("{:-<60}", "");

    for name in &names {
        match resolver.get_price(name, false, timeout).await {
            Ok(quote) => {
                let usd = resolver
                    .get_price_in(name, Currency::Usd, false, timeout)
                    .await
                    .map(|q| format!("${:.2}", q.price_amount()))
                    .unwrap_or_else(|_| "-".to_string());
                println!(
                    "{:<20} {:>10} TON {:>10}  ({})",
                    name,
                    quote.price_amount().to_string(),
                    usd,
                    quote.source()
                );
            }
            Err(e) => println!("{:<20} {}", name, e),
        }
    }

    println!("{:-<60}", "");
    for m in resolver.strategy_metrics().await {
        println!(
            "{:<20} p50={:.0}ms p99={:.0}ms success_rate={:.1}%",
            m.strategy_id.as_str(),
            m.latency_p50_ms,
            m.latency_p99_ms,
            m.success_rate * 100.0
        );
    }

    let health = resolver.health_check().await;
    println!("Health: {:?} - {}", health.status, health.message.unwrap_or_default());

    Ok(())
}
