//! storefront-admin: staff command line for the storefront database.
//!
//! Usage:
//!   storefront-admin migrate        --db shop.db
//!   storefront-admin seed-demo      --db shop.db
//!   storefront-admin dashboard      --db shop.db --operator 1
//!   storefront-admin export-csv     --db shop.db --operator 1 [--out transactions.csv]
//!   storefront-admin extend-expired --db shop.db --operator 1
//!   storefront-admin set-status     --db shop.db --operator 1 --order 7 --status Shipped
//!   storefront-admin ipc            --db shop.db
//!
//! Every command accepts `--policy <path>` (default data/risk_policy.json).

use anyhow::{bail, Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use storefront_core::{
    admin,
    checkout::{CheckoutOutcome, Storefront},
    config::RiskPolicy,
    routes::{self, Request},
    transaction_record::CheckoutDetails,
    types::UserId,
    verification,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Request { request: Request },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        bail!("usage: storefront-admin <command> [--db PATH] [--policy PATH] [--operator ID]");
    };
    let db = find_arg(&args, "--db").unwrap_or("storefront.db");
    let policy_path = find_arg(&args, "--policy").unwrap_or("data/risk_policy.json");

    let policy = if Path::new(policy_path).exists() {
        RiskPolicy::load(policy_path)?
    } else {
        log::warn!("policy file {policy_path} not found, using built-in defaults");
        RiskPolicy::default()
    };
    let shop = Storefront::open(db, policy).with_context(|| format!("opening {db}"))?;

    match command {
        "migrate" => println!("database {db} is up to date"),
        "seed-demo" => seed_demo(&shop)?,
        "dashboard" => {
            let operator = shop.customer(operator_id(&args)?)?;
            let dashboard = admin::fraud_dashboard(shop.store(), &operator, shop.now())?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }
        "export-csv" => {
            let operator = shop.customer(operator_id(&args)?)?;
            let local = shop.policy().local_offset();
            let rows = match find_arg(&args, "--out") {
                Some(path) => {
                    let out = BufWriter::new(File::create(path)?);
                    admin::export_transaction_data(shop.store(), &operator, local, out)?
                }
                None => admin::export_transaction_data(shop.store(), &operator, local, io::stdout().lock())?,
            };
            eprintln!("exported {rows} transactions");
        }
        "extend-expired" => {
            let operator = shop.customer(operator_id(&args)?)?;
            let now = shop.now();
            let keys: Vec<_> = shop
                .store()
                .expired_pending_holds(now)?
                .into_iter()
                .map(|h| h.confirmation_key)
                .collect();
            let extended = verification::extend_expiry(shop.store(), shop.policy(), &operator, &keys, now)?;
            println!("extended {extended} verification holds");
        }
        "set-status" => {
            let operator = shop.customer(operator_id(&args)?)?;
            let order_id: i64 = find_arg(&args, "--order")
                .context("--order is required")?
                .parse()
                .context("--order must be a number")?;
            let status = find_arg(&args, "--status").context("--status is required")?;
            let order = admin::update_order_status(shop.store(), &operator, order_id, status, shop.now())?;
            println!("order #{} is now {}", order.order_id, order.status.label());
        }
        "ipc" => run_ipc_loop(&shop)?,
        other => bail!("unknown command: {other}"),
    }
    Ok(())
}

/// One JSON command per stdin line, one JSON response per stdout line.
fn run_ipc_loop(shop: &Storefront) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Request { request } => {
                let response = routes::handle(shop, &request);
                writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

/// A staff account, two customers, a small catalog, and one checkout down
/// each path.
fn seed_demo(shop: &Storefront) -> Result<()> {
    let store = shop.store();
    let now = shop.now();

    let staff = store.insert_customer("admin", "London", now - Duration::days(400), true)?;
    let regular = store.insert_customer("alice", "London", now - Duration::days(90), false)?;
    let fresh = store.insert_customer("bob", "Paris", now - Duration::hours(2), false)?;

    let mug = store.insert_product("Coffee Mug", Decimal::new(1250, 2), 200)?;
    let lamp = store.insert_product("Desk Lamp", Decimal::new(4999, 2), 50)?;
    let headphones = store.insert_product("Studio Headphones", Decimal::new(18900, 2), 40)?;

    let cart = store.create_cart(regular, now)?;
    store.add_cart_item(cart, mug, 2)?;
    store.add_cart_item(cart, lamp, 1)?;
    let details = CheckoutDetails {
        confirmed_location: "London".into(),
        shipping_address: "1 High Street, London".into(),
        billing_address: "1 High Street, London".into(),
        ..Default::default()
    };
    report("alice", shop.checkout(regular, &details)?);

    let cart = store.create_cart(fresh, now)?;
    store.add_cart_item(cart, headphones, 2)?;
    let details = CheckoutDetails {
        confirmed_location: "Berlin".into(),
        shipping_address: "9 Unter den Linden, Berlin".into(),
        billing_address: "4 Rue de Rivoli, Paris".into(),
        ..Default::default()
    };
    report("bob", shop.checkout(fresh, &details)?);

    println!("staff operator id: {staff}");
    Ok(())
}

fn report(username: &str, outcome: CheckoutOutcome) {
    match outcome {
        CheckoutOutcome::Placed { order, assessment } => println!(
            "{username}: order #{} placed ({}), risk score {}",
            order.order_id, order.total_price, assessment.risk_score
        ),
        CheckoutOutcome::VerificationRequired { hold, assessment } => println!(
            "{username}: held for verification, risk score {}, key {} expires {}",
            assessment.risk_score, hold.confirmation_key, hold.expiry_time
        ),
    }
}

fn operator_id(args: &[String]) -> Result<UserId> {
    find_arg(args, "--operator")
        .context("--operator is required for staff commands")?
        .parse()
        .context("--operator must be a user id")
}

fn find_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
