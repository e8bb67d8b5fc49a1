pub mod client;

pub use client::PaymentGatewayClient;
