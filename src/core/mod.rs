pub mod agents;
pub mod credentials;
pub mod ledger;
pub mod llm;
pub mod mail;
pub mod orchestrator;
pub mod tools;
pub mod worker;
