use clap::Parser;

/// Initialise logging and parse the scenario's CLI.
pub fn init<C: Parser>() -> C {
    env_logger::init();

    C::parse()
}
