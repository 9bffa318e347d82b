//! The command line contract of each tool. Parameters are passed through, nothing is negotiated.

use std::path::Path;
use std::time::Duration;

use crate::process::CommandSpec;
use crate::request::{IperfParams, NlmtParams, RunRequest, ToolParams, Transport};

/// Build the command for one host of `request`, writing the result to `output_dir/file_name`.
pub fn build_command(
    request: &RunRequest,
    host: Option<&str>,
    binary: &Path,
    output_dir: &Path,
    file_name: &str,
) -> CommandSpec {
    let cmd = CommandSpec::new(binary).working_dir(output_dir);
    match request.params() {
        ToolParams::NlmtClient(params) => nlmt_client(
            cmd,
            params,
            host.unwrap_or_default(),
            request.duration(),
            output_dir,
            file_name,
        ),
        ToolParams::NlmtServer(params) => nlmt_server(cmd, params, host),
        ToolParams::IperfClient(params) => iperf_client(
            cmd,
            params,
            host.unwrap_or_default(),
            request.duration(),
            &output_dir.join(file_name),
        ),
        ToolParams::IperfServer(params) => {
            iperf_server(cmd, params, host, &output_dir.join(file_name))
        }
    }
}

fn nlmt_client(
    cmd: CommandSpec,
    params: &NlmtParams,
    host: &str,
    duration: Duration,
    output_dir: &Path,
    file_name: &str,
) -> CommandSpec {
    let mut cmd = cmd.arg("client");
    if let Some(key) = &params.hmac_key {
        cmd = cmd.arg("--hmac").arg(key);
    }
    cmd = cmd
        .arg("-d")
        .arg(go_duration(duration))
        .arg("-i")
        .arg(go_duration(params.interval));
    if let Some(size) = params.packet_size {
        cmd = cmd.arg("-l").arg(size.to_string());
    }
    cmd.arg("-o")
        .arg(file_name)
        .arg(format!("--outdir={}", output_dir.display()))
        .arg(host)
}

fn nlmt_server(cmd: CommandSpec, params: &NlmtParams, host: Option<&str>) -> CommandSpec {
    let mut cmd = cmd.arg("server");
    if let Some(key) = &params.hmac_key {
        cmd = cmd.arg("--hmac").arg(key);
    }
    if let Some(host) = host {
        cmd = cmd.arg("-b").arg(host);
    }
    cmd
}

fn iperf_client(
    cmd: CommandSpec,
    params: &IperfParams,
    host: &str,
    duration: Duration,
    output_file: &Path,
) -> CommandSpec {
    let mut cmd = cmd
        .arg("-c")
        .arg(host)
        .arg("-t")
        .arg(whole_seconds(duration).to_string())
        .arg("-i")
        .arg(params.interval.as_secs_f64().to_string())
        .arg("-J")
        .arg("--logfile")
        .arg(output_file);
    if params.transport == Transport::Udp {
        cmd = cmd.arg("-u");
    }
    if params.reverse {
        cmd = cmd.arg("-R");
    }
    if let Some(bandwidth) = &params.bandwidth {
        cmd = cmd.arg("-b").arg(bandwidth);
    }
    if let Some(size) = params.packet_size {
        cmd = cmd.arg("-l").arg(size.to_string());
    }
    cmd
}

fn iperf_server(
    cmd: CommandSpec,
    params: &IperfParams,
    host: Option<&str>,
    output_file: &Path,
) -> CommandSpec {
    let mut cmd = cmd.arg("-s").arg("-1");
    if let Some(host) = host {
        cmd = cmd.arg("-B").arg(host);
    }
    cmd.arg("-i")
        .arg(params.interval.as_secs_f64().to_string())
        .arg("-J")
        .arg("--logfile")
        .arg(output_file)
}

/// Format a duration the way NLMT parses it, e.g. `60s` or `100ms`.
fn go_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else if duration.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}us", duration.as_micros())
    }
}

/// iPerf only takes whole seconds, round up so the test is never shorter than requested.
fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use super::*;

    fn args(cmd: &CommandSpec) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a: &OsString| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn nlmt_client_flags() {
        let request = RunRequest::new(
            ToolParams::NlmtClient(NlmtParams {
                interval: Duration::from_millis(100),
                packet_size: Some(172),
                ..Default::default()
            }),
            vec!["irtt.heistp.net".to_string()],
            Duration::from_secs(60),
        )
        .unwrap();

        let cmd = build_command(
            &request,
            Some("irtt.heistp.net"),
            Path::new("/opt/nlmt"),
            Path::new("/tmp/out"),
            "irtt.heistp.net_20240501-100000.json",
        );

        assert_eq!(cmd.program, PathBuf::from("/opt/nlmt"));
        assert_eq!(
            args(&cmd),
            vec![
                "client",
                "--hmac",
                "irttuser",
                "-d",
                "60s",
                "-i",
                "100ms",
                "-l",
                "172",
                "-o",
                "irtt.heistp.net_20240501-100000.json",
                "--outdir=/tmp/out",
                "irtt.heistp.net"
            ]
        );
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn nlmt_server_flags() {
        let request = RunRequest::new(
            ToolParams::NlmtServer(NlmtParams {
                hmac_key: None,
                ..Default::default()
            }),
            vec![],
            Duration::from_secs(60),
        )
        .unwrap();

        let cmd = build_command(
            &request,
            None,
            Path::new("nlmt"),
            Path::new("/tmp"),
            "x",
        );

        assert_eq!(args(&cmd), vec!["server"]);
    }

    #[test]
    fn iperf_client_udp_reverse_flags() {
        let request = RunRequest::new(
            ToolParams::IperfClient(IperfParams {
                interval: Duration::from_millis(500),
                transport: Transport::Udp,
                reverse: true,
                bandwidth: Some("50M".to_string()),
                packet_size: None,
            }),
            vec!["10.0.0.2".to_string()],
            Duration::from_millis(10_500),
        )
        .unwrap();

        let cmd = build_command(
            &request,
            Some("10.0.0.2"),
            Path::new("iperf3"),
            Path::new("/tmp/out"),
            "10.0.0.2_t.json",
        );

        assert_eq!(
            args(&cmd),
            vec![
                "-c",
                "10.0.0.2",
                "-t",
                "11",
                "-i",
                "0.5",
                "-J",
                "--logfile",
                "/tmp/out/10.0.0.2_t.json",
                "-u",
                "-R",
                "-b",
                "50M"
            ]
        );
    }

    #[test]
    fn iperf_server_flags() {
        let request = RunRequest::new(
            ToolParams::IperfServer(IperfParams::default()),
            vec!["0.0.0.0".to_string()],
            Duration::from_secs(30),
        )
        .unwrap();

        let cmd = build_command(
            &request,
            Some("0.0.0.0"),
            Path::new("iperf3"),
            Path::new("/tmp/out"),
            "s.json",
        );

        assert_eq!(
            args(&cmd),
            vec![
                "-s",
                "-1",
                "-B",
                "0.0.0.0",
                "-i",
                "1",
                "-J",
                "--logfile",
                "/tmp/out/s.json"
            ]
        );
    }

    #[test]
    fn duration_formats() {
        assert_eq!(go_duration(Duration::from_secs(5)), "5s");
        assert_eq!(go_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(go_duration(Duration::from_micros(10)), "10us");
        assert_eq!(whole_seconds(Duration::from_secs(10)), 10);
        assert_eq!(whole_seconds(Duration::from_millis(100)), 1);
    }
}
