mod client;
pub use client::Client;

mod pipeline;
pub use pipeline::Pipeline;
