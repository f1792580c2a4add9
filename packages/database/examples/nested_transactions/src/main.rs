//! Nested transactions on the simulator engine.
//!
//! A transfer is built from two smaller transactional helpers. Called on
//! their own, each helper commits; called from `transfer`, they join its
//! transaction, so an overdraw detected in the second step also undoes the
//! first.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use transwarp_database::{
    DatabaseError, engine, execute_raw, insert, params, select_all, select_int, simulator, update,
    with_transaction,
};

fn balance(name: &str) -> Result<i64, DatabaseError> {
    Ok(select_int("select balance from accounts where name=?", params![name])?.unwrap_or(0))
}

fn deposit(name: &str, amount: i64) -> Result<(), DatabaseError> {
    with_transaction(|| {
        update(
            "update accounts set balance = balance + ? where name=?",
            params![amount, name],
        )?;
        Ok(())
    })
}

fn withdraw(name: &str, amount: i64) -> Result<(), DatabaseError> {
    with_transaction(|| {
        update(
            "update accounts set balance = balance - ? where name=?",
            params![amount, name],
        )?;
        if balance(name)? < 0 {
            return Err(DatabaseError::InvalidRequest(format!(
                "{name} can't cover {amount}"
            )));
        }
        Ok(())
    })
}

fn transfer(from: &str, to: &str, amount: i64) -> Result<(), DatabaseError> {
    with_transaction(|| {
        deposit(to, amount)?;
        withdraw(from, amount)
    })
}

fn print_balances() -> Result<(), DatabaseError> {
    for row in select_all("select name, balance from accounts order by name", params![])? {
        let name = row.get("name").and_then(|v| v.as_str().map(ToString::to_string));
        let balance = row.get("balance").and_then(|v| v.as_i64());
        println!(
            "   {}: {}",
            name.unwrap_or_default(),
            balance.unwrap_or_default()
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    println!("Nested Transactions Example");
    println!("===========================\n");

    engine::init(simulator::engine()?)?;

    with_transaction(|| {
        execute_raw(
            "create table accounts (name text primary key, balance integer not null)",
            params![],
        )?;
        insert("accounts", &[("name", "alice".into()), ("balance", 100.into())])?;
        insert("accounts", &[("name", "bob".into()), ("balance", 50.into())])?;
        Ok::<_, DatabaseError>(())
    })?;
    println!("Opening balances:");
    print_balances()?;

    println!("\n1. alice sends bob 30");
    transfer("alice", "bob", 30)?;
    print_balances()?;

    println!("\n2. bob sends alice 500 (overdraw)");
    match transfer("bob", "alice", 500) {
        Ok(()) => println!("   unexpected success"),
        Err(e) => println!("   rejected: {e}"),
    }
    println!("   alice's deposit was rolled back with it:");
    print_balances()?;

    println!("\n3. a standalone deposit commits on its own");
    deposit("bob", 5)?;
    print_balances()?;

    log::info!("done");

    Ok(())
}
