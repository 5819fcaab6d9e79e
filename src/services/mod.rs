// Cart, pricing and checkout
pub mod commerce;

// Order read side and lifecycle
pub mod order_status;
pub mod orders;

// Payments
pub mod payment_reconciliation;
pub mod payments;

// Order numbers and payment references
pub mod references;
