use clap::Parser;
use netgauge_runner::prelude::*;

/// Measure throughput with iPerf.
#[derive(Parser)]
#[command(about, long_about = None)]
struct IperfThroughputCli {
    #[command(flatten)]
    common: NetGaugeScenarioCli,

    /// Use UDP rather than TCP.
    #[clap(long, default_value = "false")]
    udp: bool,

    /// Have the server send and the client receive.
    #[clap(long, default_value = "false")]
    reverse: bool,

    /// Target bandwidth in iPerf's notation, e.g. `100M`.
    #[clap(long)]
    bandwidth: Option<String>,
}

fn main() -> NetGaugeResult<()> {
    let cli = init::<IperfThroughputCli>();

    let params = IperfParams {
        interval: cli.common.interval,
        transport: if cli.udp {
            Transport::Udp
        } else {
            Transport::Tcp
        },
        reverse: cli.reverse,
        bandwidth: cli.bandwidth,
        packet_size: cli.common.packet_size,
    };
    let params = if cli.common.server {
        ToolParams::IperfServer(params)
    } else {
        ToolParams::IperfClient(params)
    };

    run(cli.common, params)
}
