//! Process-wide logging init, grounded on the teacher's `main.rs` init block.
//! Installing the global `tracing_subscriber` is also the "ambient global
//! tracing toggle" called for in spec §9: `tonic`'s own internal logging
//! already flows through the `tracing` facade, so no separate logger
//! replacement step is needed (see DESIGN.md, Open Question 3).

use tracing_subscriber::EnvFilter;

pub fn init(default_level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
