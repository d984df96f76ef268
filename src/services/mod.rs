pub mod accounts;
pub mod expenses;
pub mod notifications;
pub mod orders;
pub mod recurring;
pub mod scheduler;
pub mod settlement;

pub use accounts::AccountService;
pub use expenses::ExpenseService;
pub use notifications::Notifier;
pub use orders::OrderService;
pub use recurring::RecurringService;
pub use scheduler::Scheduler;
pub use settlement::SettlementService;
