//! Vaultscope - Multi-chain Yield Vault Inspector
//!
//! Run with: cargo run -- scan
//!
//! Aggregates on-chain vault state through batched reads, discovers
//! attached strategies, derives TVL/APY/utilization, and drives
//! approve/deposit/withdraw/zap transactions with precondition checks.

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use futures::future::join_all;
use std::str::FromStr;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod amount;
mod chains;
mod config;
mod metrics;
mod oracle;
mod reader;
mod registry;
mod tx;
mod vault;

use amount::TokenAmount;
use chains::{chain_info, ChainInfo};
use config::Config;
use metrics::{aggregate_tvl, estimate_apy, BlockLookup, ChainHistory, TvlEntry};
use oracle::PriceOracle;
use reader::Multicall;
use registry::{Catalog, CommunityFactory, VaultDescriptor};
use tx::{CycleCtx, OpAmount, TxEngine, TxOutcome};
use vault::strategies::{walk_strategies, ChainSlots, MetadataClient};
use vault::{refresh_vault, VaultStore};

#[derive(Parser)]
#[command(name = "vaultscope", about = "Inspect and drive yield vaults across chains")]
struct Cli {
    /// Chain id override (defaults to CHAIN_ID / 1)
    #[arg(long, global = true)]
    chain: Option<u64>,

    /// Catalog file override
    #[arg(long, global = true)]
    catalog: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh every vault on the chain and print the TVL breakdown
    Scan,

    /// Detailed view of one vault: state, strategies, APY horizons
    Vault {
        slug: String,
    },

    /// Grant the vault (or its zap) an allowance on the underlying
    Approve {
        slug: String,
        /// Decimal amount; omit for unlimited
        #[arg(long)]
        amount: Option<String>,
        /// Approve the zap contract instead of the vault
        #[arg(long)]
        zap: bool,
    },

    /// Deposit underlying into a vault
    Deposit {
        slug: String,
        #[arg(long, conflicts_with = "all")]
        amount: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Redeem vault shares
    Withdraw {
        slug: String,
        #[arg(long, conflicts_with = "all")]
        amount: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Deposit the native coin through the zap contract
    ZapIn {
        slug: String,
        #[arg(long)]
        amount: String,
    },

    /// Exit to the native coin through the zap contract
    ZapOut {
        slug: String,
        #[arg(long, conflicts_with = "all")]
        amount: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Trigger a harvest on a community vault strategy
    Harvest {
        slug: String,
        #[arg(long)]
        strategy: String,
    },

    /// Deploy a community vault for a gauge (guarded against duplicates)
    CreateVault {
        #[arg(long)]
        gauge: String,
    },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🔭 VAULTSCOPE - Yield Vault Inspector").cyan().bold()
    );
    println!(
        "{}",
        style("    Batched Reads | Strategy Discovery | Guarded Transactions").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

/// Shared per-invocation wiring: chain, reader, store, collaborators.
struct App {
    chain: &'static ChainInfo,
    config: Config,
    catalog: Catalog,
    reader: Multicall,
    store: VaultStore,
    oracle: PriceOracle,
    metadata: MetadataClient,
    blocks: BlockLookup,
    user: Address,
    signer: Option<PrivateKeySigner>,
}

impl App {
    fn build(cli: &Cli) -> Result<Self> {
        let mut config = Config::from_env()?;
        if let Some(chain) = cli.chain {
            config.chain_id = chain;
        }
        if let Some(catalog) = &cli.catalog {
            config.catalog_path = Some(catalog.clone());
        }
        config.validate()?;

        let chain = chain_info(config.chain_id)
            .ok_or_else(|| eyre!("chain {} not in the table", config.chain_id))?;

        let signer = match &config.signer_key {
            Some(key) => {
                let signer = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
                    .map_err(|e| eyre!("SIGNER_KEY rejected: {}", e))?;
                Some(signer)
            }
            None => None,
        };

        // the signer's account wins; otherwise whatever we were told to watch
        let user = signer
            .as_ref()
            .map(|s| s.address())
            .or_else(|| config.watch())
            .unwrap_or(Address::ZERO);

        Ok(Self {
            chain,
            catalog: Catalog::load_or_builtin(config.catalog_path.as_deref()),
            reader: Multicall::for_chain(chain),
            store: VaultStore::new(),
            oracle: PriceOracle::new(Some(config.price_base_url.clone())),
            metadata: MetadataClient::new(config.metadata_base_url.clone()),
            blocks: BlockLookup::new(config.block_base_url.clone()),
            user,
            signer,
            config,
        })
    }

    fn ctx(&self) -> CycleCtx<'_> {
        CycleCtx {
            reader: &self.reader,
            store: &self.store,
            oracle: &self.oracle,
            user: self.user,
        }
    }

    fn engine(&self) -> Result<TxEngine> {
        self.config.validate_for_writes()?;
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| eyre!("this command submits a transaction; set SIGNER_KEY"))?;
        Ok(TxEngine::with_timing(
            self.chain,
            signer,
            self.config.receipt_timeout(),
            tx::DEFAULT_COOLDOWN,
        ))
    }

    /// Catalog entries plus factory discoveries for the active chain.
    async fn list_vaults(&self) -> Vec<VaultDescriptor> {
        let mut vaults = self.catalog.list_vaults(self.chain.id);
        if let Some(factory) = self.config.factory() {
            match CommunityFactory::new(factory)
                .discover(&self.reader, &self.catalog)
                .await
            {
                Ok(found) => vaults.extend(found),
                Err(e) => warn!("factory discovery failed: {}", e),
            }
        }
        vaults
    }

    fn resolve(&self, slug: &str) -> Result<VaultDescriptor> {
        self.catalog
            .by_slug(slug)
            .filter(|d| d.chain_id == self.chain.id)
            .cloned()
            .ok_or_else(|| eyre!("no vault '{}' on {}", slug, self.chain.name))
    }

    fn parse_amount(&self, desc: &VaultDescriptor, s: &str) -> Result<U256> {
        Ok(TokenAmount::from_decimal_str(s, desc.want_decimals)?.raw)
    }
}

fn fmt_usd(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("${:.2}", v),
        None => "unavailable".to_string(),
    }
}

fn fmt_apr(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v),
        None => "n/a".to_string(),
    }
}

fn fmt_amount(value: &Option<TokenAmount>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "unavailable".to_string(),
    }
}

fn report_outcome(outcome: &TxOutcome) {
    match outcome {
        TxOutcome::Confirmed { tx_hash } => {
            println!("{} confirmed: {}", style("✓").green(), tx_hash);
        }
        TxOutcome::Rejected { reason } => {
            println!("{} rejected before dispatch: {}", style("✗").yellow(), reason);
        }
        TxOutcome::Conflict { existing } => {
            println!(
                "{} a vault for this gauge already exists: {}",
                style("✗").yellow(),
                existing
            );
        }
        TxOutcome::Failed { reason } => {
            println!("{} transaction failed: {}", style("✗").red(), reason);
        }
    }
}

async fn run_scan(app: &App) -> Result<()> {
    println!("{}", style("═══ SCAN ═══").blue().bold());
    let vaults = app.list_vaults().await;
    println!(
        "{} {} vaults on {}",
        style("✓").green(),
        vaults.len(),
        app.chain.name
    );
    println!();

    // warm the quote cache with one batched request
    let tags: Vec<&str> = vaults.iter().filter_map(|v| v.price_source()).collect();
    let quotes = app.oracle.usd_prices(&tags).await;

    // refresh cycles are independent, run them concurrently
    let refreshes = vaults
        .iter()
        .map(|desc| refresh_vault(&app.reader, desc, app.user, &app.store, &app.oracle));
    for (desc, result) in vaults.iter().zip(join_all(refreshes).await) {
        if let Err(e) = result {
            warn!(slug = %desc.slug, "refresh failed: {}", e);
        }
    }

    let mut entries = Vec::with_capacity(vaults.len());
    for desc in &vaults {
        let state = app.store.state((desc.chain_id, desc.address)).await;

        let price = desc.price_source().and_then(|t| quotes.get(t)).copied();
        entries.push(TvlEntry {
            status: desc.status,
            category: desc.category,
            total_assets: state.total_assets.as_ref().map(|a| a.as_f64()),
            asset_price_usd: price,
        });

        println!(
            "  {} {} {:>12} {} | AUM {} | {:>4.0}% full",
            desc.logo,
            style(&desc.slug).cyan(),
            fmt_amount(&state.total_assets),
            desc.want_symbol,
            fmt_usd(state.total_aum_usd),
            state.utilization * 100.0
        );
    }

    let tvl = aggregate_tvl(&entries, &app.config.tvl_policy());
    println!();
    println!("{}", style("═══ TVL ═══").blue().bold());
    println!("  Endorsed:     {}", fmt_usd(Some(tvl.endorsed)));
    println!("  Experimental: {}", fmt_usd(Some(tvl.experimental)));
    println!("  Deprecated:   {}", fmt_usd(Some(tvl.deprecated)));
    println!("  Total:        {}", style(fmt_usd(Some(tvl.total()))).bold());
    Ok(())
}

async fn run_vault_view(app: &App, slug: &str) -> Result<()> {
    let desc = app.resolve(slug)?;
    println!(
        "{}",
        style(format!("═══ {} {} ═══", desc.logo, desc.title)).blue().bold()
    );

    refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
    let state = app.store.state((desc.chain_id, desc.address)).await;

    println!("  Status:            {:?} / {:?}", desc.status, desc.category);
    println!("  Price per share:   {}", fmt_amount(&state.price_per_share));
    println!(
        "  Total assets:      {} {}",
        fmt_amount(&state.total_assets),
        desc.want_symbol
    );
    println!("  Deposit limit:     {}", fmt_amount(&state.deposit_limit));
    println!(
        "  Available limit:   {}",
        fmt_amount(&state.available_deposit_limit)
    );
    println!("  Utilization:       {:.1}%", state.utilization * 100.0);
    println!("  AUM:               {}", fmt_usd(state.total_aum_usd));
    println!();
    println!("  Your shares:       {}", fmt_amount(&state.share_balance));
    println!("  Your balance:      {}", fmt_usd(state.balance_usd));
    println!(
        "  Wallet {}:        {}",
        desc.want_symbol,
        fmt_amount(&state.want_balance)
    );
    println!(
        "  Wallet {}:         {}",
        app.chain.native_symbol,
        fmt_amount(&state.coin_balance)
    );
    println!("  Vault allowance:   {}", fmt_amount(&state.vault_allowance));
    if desc.zap.is_some() {
        println!("  Zap allowance:     {}", fmt_amount(&state.zap_allowance));
    }

    // strategy walk, incremental records land in the store as found
    println!();
    println!("{}", style("Strategies:").bold());
    let slots = ChainSlots::new(&app.reader, desc.address);
    let ticket = app.store.ticket().await;
    let records = walk_strategies(&slots, &desc, &app.metadata, &app.store, ticket).await?;
    if records.is_empty() {
        println!("  (none in the withdrawal queue)");
    }
    for record in &records {
        println!(
            "  • {} ({})",
            style(&record.name).cyan(),
            record.address
        );
        println!("    credit: {} {}", record.credit_available, desc.want_symbol);
        println!("    {}", record.description);
        if record.harvestable {
            println!("    {}", style("harvestable (community vault)").magenta());
        }
    }

    // APY horizons
    if let (Some(pps), Some(activation)) = (state.price_per_share.as_ref(), state.activation) {
        let history = ChainHistory::new(&app.reader, &app.blocks, &desc);
        let now = Utc::now().timestamp() as u64;
        match estimate_apy(pps.as_f64(), activation, now, &history).await {
            Ok(est) => {
                println!();
                println!("{}", style("Yield:").bold());
                println!("  Week:      {}", fmt_apr(est.week_apr));
                println!("  Month:     {}", fmt_apr(est.month_apr));
                println!("  Inception: {}", fmt_apr(est.inception));
            }
            Err(e) => warn!("APY estimate failed: {}", e),
        }
    }
    Ok(())
}

async fn run_command(app: &App, command: &Command) -> Result<()> {
    match command {
        Command::Scan => run_scan(app).await,

        Command::Vault { slug } => run_vault_view(app, slug).await,

        Command::Approve { slug, amount, zap } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            // zap-out spends vault shares, deposits spend the underlying
            let (token, spender) = if *zap {
                let zap = desc.zap.ok_or_else(|| eyre!("{} has no zap contract", slug))?;
                (desc.address, zap)
            } else {
                (desc.want, desc.address)
            };
            let amount = match amount {
                Some(s) => app.parse_amount(&desc, s)?,
                None => amount::UNLIMITED,
            };
            refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
            let outcome = engine
                .approve(&app.ctx(), &desc, token, spender, amount)
                .await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::Deposit { slug, amount, all } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            let amount = match (amount, all) {
                (Some(s), _) => OpAmount::Exact(app.parse_amount(&desc, s)?),
                (None, true) => OpAmount::All,
                (None, false) => return Err(eyre!("pass --amount or --all")),
            };
            refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
            let outcome = engine.deposit(&app.ctx(), &desc, amount).await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::Withdraw { slug, amount, all } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            let amount = match (amount, all) {
                (Some(s), _) => OpAmount::Exact(app.parse_amount(&desc, s)?),
                (None, true) => OpAmount::All,
                (None, false) => return Err(eyre!("pass --amount or --all")),
            };
            refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
            let outcome = engine.withdraw(&app.ctx(), &desc, amount).await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::ZapIn { slug, amount } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            // the native coin is always 18 decimals
            let amount = TokenAmount::from_decimal_str(amount, 18)?.raw;
            refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
            let outcome = engine.zap_in(&app.ctx(), &desc, amount).await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::ZapOut { slug, amount, all } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            let amount = match (amount, all) {
                (Some(s), _) => OpAmount::Exact(app.parse_amount(&desc, s)?),
                (None, true) => OpAmount::All,
                (None, false) => return Err(eyre!("pass --amount or --all")),
            };
            refresh_vault(&app.reader, &desc, app.user, &app.store, &app.oracle).await?;
            let outcome = engine.zap_out(&app.ctx(), &desc, amount).await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::Harvest { slug, strategy } => {
            let desc = app.resolve(slug)?;
            let engine = app.engine()?;
            let strategy = Address::from_str(strategy)
                .map_err(|_| eyre!("invalid strategy address: {}", strategy))?;
            let outcome = engine.harvest(&app.ctx(), &desc, strategy).await;
            report_outcome(&outcome);
            Ok(())
        }

        Command::CreateVault { gauge } => {
            let factory = app
                .config
                .factory()
                .ok_or_else(|| eyre!("no factory on {}", app.chain.name))?;
            let engine = app.engine()?;
            let gauge = Address::from_str(gauge)
                .map_err(|_| eyre!("invalid gauge address: {}", gauge))?;
            let outcome = engine
                .create_vault(&app.ctx(), &CommunityFactory::new(factory), gauge)
                .await;
            report_outcome(&outcome);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vaultscope=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    print_banner();

    let app = App::build(&cli)?;
    app.config.print_summary();
    println!();

    if let Err(e) = run_command(&app, &cli.command).await {
        error!("{}", e);
        return Err(e);
    }

    println!();
    println!("{}", style("✅ DONE").green().bold());
    Ok(())
}
