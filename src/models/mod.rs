pub mod activity;
pub mod agent;
pub mod deliverable;
pub mod job;
pub mod ledger;
pub mod message;
pub mod negotiation;
pub mod payment;
pub mod service;

pub use activity::ActivityLog;
pub use agent::{Agent, AgentStatus};
pub use deliverable::Deliverable;
pub use job::{EscrowStatus, Job, JobStatus, NegotiatedBy, PricingSource};
pub use ledger::{LedgerTransaction, LedgerTransactionType};
pub use message::InboxMessage;
pub use negotiation::{Negotiation, NegotiationOffer, NegotiationStatus, Role};
pub use payment::{PaymentTransaction, TransactionStatus, TransactionType};
pub use service::{OutputType, Service};
