use tokio::process::{Child, Command};

pub fn cmd_program(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd
}

/// Hard-kill a child and reap it. Already-exited children are not an error.
pub async fn kill_forcefully(child: &mut Child) -> std::io::Result<()> {
    match child.kill().await {
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}
