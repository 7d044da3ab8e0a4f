use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use booking_adapters::{
    load_discounts, load_full_catalog, DiscountSource, FixtureCatalog, InMemoryOrderService,
    OrderService, ProviderCatalog,
};
use booking_core::{available_countries, filter_providers, quote_provider, ServiceCategory};
use booking_http::{HttpBookingClient, HttpClientConfig};
use booking_wizard::{
    load_price_table, load_session_script, run_script, BookingConfig, BookingSession, Clock,
    SubmitOutcome, SystemClock,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "booking-cli")]
#[command(about = "Home-service booking command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List bookable providers for a category, optionally narrowed to a nationality.
    Providers {
        #[arg(long)]
        category: ServiceCategory,
        #[arg(long)]
        country: Option<String>,
    },
    /// List nationalities with at least one bookable provider.
    Countries {
        #[arg(long)]
        category: ServiceCategory,
    },
    /// Price a provider with whichever discount is live right now.
    Quote {
        #[arg(long)]
        provider: String,
    },
    /// Replay a scripted booking session and submit the order.
    Book {
        #[arg(long)]
        script: PathBuf,
    },
}

struct Collaborators {
    catalog: Box<dyn ProviderCatalog>,
    discounts: Box<dyn DiscountSource>,
    orders: Arc<dyn OrderService>,
}

fn collaborators(config: &BookingConfig) -> Result<Collaborators> {
    if let Some(base_url) = &config.api_base_url {
        let client = HttpBookingClient::new(HttpClientConfig {
            base_url: base_url.clone(),
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
        })?;
        tracing::info!(%base_url, "using remote booking backend");
        return Ok(Collaborators {
            catalog: Box::new(client.clone()),
            discounts: Box::new(client.clone()),
            orders: Arc::new(client),
        });
    }

    let path = config.catalog_bundle_path();
    let fixture = FixtureCatalog::from_path(&path)
        .with_context(|| format!("loading fixture catalog {}", path.display()))?;
    tracing::info!(fixture_id = %fixture.bundle().fixture_id, "using fixture catalog");
    Ok(Collaborators {
        catalog: Box::new(fixture.clone()),
        discounts: Box::new(fixture),
        orders: Arc::new(InMemoryOrderService::default()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = BookingConfig::from_env();
    let collab = collaborators(&config)?;

    match cli.command {
        Commands::Providers { category, country } => {
            let snapshot = load_full_catalog(collab.catalog.as_ref()).await;
            if let Some(error) = &snapshot.error {
                eprintln!("warning: catalog incomplete: {error}");
            }
            let eligible = filter_providers(&snapshot.providers, category, country.as_deref());
            if eligible.is_empty() {
                println!("no {category} providers available");
            }
            for p in eligible {
                println!(
                    "{}\t{}\t{}\t{:?}",
                    p.id, p.display_name, p.nationality, p.status
                );
            }
        }
        Commands::Countries { category } => {
            let snapshot = load_full_catalog(collab.catalog.as_ref()).await;
            for country in available_countries(&snapshot.providers, category) {
                println!("{country}");
            }
        }
        Commands::Quote { provider } => {
            let snapshot = load_full_catalog(collab.catalog.as_ref()).await;
            let discounts = load_discounts(collab.discounts.as_ref()).await;
            let prices = load_price_table(config.pricing_rules_path()).await?;
            let Some(p) = snapshot.providers.iter().find(|p| p.id == provider) else {
                bail!("provider {provider} is not in the catalog");
            };
            let Some(category) = p.category() else {
                bail!("provider {provider} has no bookable contract type");
            };
            let quote = quote_provider(p, category, &prices, &discounts, SystemClock.now());
            let shown = quote.display_amounts();
            println!("provider: {} ({category})", p.display_name);
            println!("original: {:.2}", shown.original);
            if let Some(discount) = quote.applied_discount.as_ref().filter(|_| quote.has_discount()) {
                println!("discount: -{:.2} ({})", shown.discount, discount.id);
            }
            println!("total:    {:.2}", shown.total);
        }
        Commands::Book { script } => {
            let script = load_session_script(&script)?;
            let prices = load_price_table(config.pricing_rules_path()).await?;
            let session = BookingSession::mount(
                collab.catalog.as_ref(),
                collab.discounts.as_ref(),
                prices,
                collab.orders.clone(),
                Arc::new(SystemClock),
            )
            .await;
            let report = run_script(&session, &script).await;
            for entry in report.errors() {
                eprintln!(
                    "turn {} at {}: {}",
                    entry.index + 1,
                    entry.step,
                    entry.error.as_deref().unwrap_or_default()
                );
            }
            match &report.outcome {
                Some(SubmitOutcome::Succeeded {
                    order_id, summary, ..
                }) => {
                    println!(
                        "order placed: order_id={} provider={} total={:.2}",
                        order_id,
                        summary.provider.id,
                        summary.quote.display_amounts().total
                    );
                }
                Some(SubmitOutcome::Failed(err)) => {
                    bail!("order failed: {err}");
                }
                Some(other) => bail!("order not placed: {other:?}"),
                None => bail!("script ended without submitting"),
            }
        }
    }

    Ok(())
}
