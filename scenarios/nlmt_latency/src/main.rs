use clap::Parser;
use netgauge_runner::prelude::*;

/// Measure round-trip latency and jitter with NLMT.
#[derive(Parser)]
#[command(about, long_about = None)]
struct NlmtLatencyCli {
    #[command(flatten)]
    common: NetGaugeScenarioCli,

    /// HMAC key shared with the server.
    #[clap(long, env = "NG_NLMT_HMAC", default_value = DEFAULT_NLMT_HMAC)]
    hmac: String,
}

fn main() -> NetGaugeResult<()> {
    let cli = init::<NlmtLatencyCli>();
    let mut common = cli.common;

    let params = NlmtParams {
        hmac_key: Some(cli.hmac),
        interval: common.interval,
        packet_size: common.packet_size,
    };
    let params = if common.server {
        ToolParams::NlmtServer(params)
    } else {
        if common.hosts.is_empty() {
            log::info!("No host given, measuring against {DEFAULT_NLMT_SERVER}");
            common.hosts.push(DEFAULT_NLMT_SERVER.to_string());
        }
        ToolParams::NlmtClient(params)
    };

    run(common, params)
}
