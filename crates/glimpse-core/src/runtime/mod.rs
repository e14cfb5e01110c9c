pub mod ledger;
pub mod runner;
pub mod types;

#[cfg(test)]
mod tests;
