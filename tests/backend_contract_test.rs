use guardian::firewall::testing::FakeRunner;
use guardian::firewall::{create_backend, BackendSettings, CommandOutput, CommandRunner};
use guardian::models::BackendKind;
use std::sync::Arc;

/// Réponses de l'outil d'état: d'abord après `enable`, puis après `disable`
fn scripted_state(kind: BackendKind, runner: &FakeRunner) {
    match kind {
        BackendKind::RuleBased => {
            runner.succeed("ufw status", "Status: active\n");
            runner.succeed("ufw status", "Status: inactive\n");
        }
        BackendKind::TableBased => {
            runner.succeed(
                "iptables -S INPUT",
                "-P INPUT DROP\n-A INPUT -i lo -j ACCEPT\n-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT\n",
            );
            runner.succeed("iptables -S INPUT", "-P INPUT ACCEPT\n");
        }
        BackendKind::ZoneBased => {
            runner.respond("firewall-cmd --state", CommandOutput::ok("running\n"));
            runner.respond(
                "firewall-cmd --state",
                CommandOutput::failed(252, "not running\n"),
            );
        }
    }
}

#[tokio::test]
async fn test_enable_disable_contract() {
    for kind in BackendKind::PRIORITY {
        let runner = Arc::new(FakeRunner::new());
        scripted_state(kind, &runner);
        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let backend = create_backend(kind, dyn_runner, &BackendSettings::default());

        backend.enable().await.unwrap();
        assert!(backend.is_enabled().await.unwrap(), "{}", kind);

        backend.disable().await.unwrap();
        backend.disable().await.unwrap();
        assert!(!backend.is_enabled().await.unwrap(), "{}", kind);
    }
}

#[tokio::test]
async fn test_enable_opens_api_port() {
    let settings = BackendSettings {
        api_port: 9443,
        ..BackendSettings::default()
    };
    let expected = [
        (BackendKind::RuleBased, "ufw allow 9443/tcp"),
        (
            BackendKind::TableBased,
            "iptables -A INPUT -p tcp --dport 9443 -j ACCEPT",
        ),
        (
            BackendKind::ZoneBased,
            "firewall-cmd --permanent --add-port=9443/tcp",
        ),
    ];

    for (kind, command) in expected {
        let runner = Arc::new(FakeRunner::new());
        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        create_backend(kind, dyn_runner, &settings)
            .enable()
            .await
            .unwrap();
        assert!(runner.was_called(command), "{}: {:?}", kind, runner.calls());
    }
}

#[tokio::test]
async fn test_ban_covers_every_managed_port() {
    for kind in BackendKind::PRIORITY {
        let runner = Arc::new(FakeRunner::new());
        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let backend = create_backend(kind, dyn_runner, &BackendSettings::default());

        // iptables: -C échoue, la règle est absente
        for port in [22, 80, 443, 4554] {
            runner.fail(
                &format!("iptables -C INPUT -s 203.0.113.7 -p tcp --dport {} -j DROP", port),
                1,
                "Bad rule",
            );
        }
        backend.ban_ip("203.0.113.7").await.unwrap();

        let calls = runner.calls();
        for port in ["22", "80", "443", "4554"] {
            assert!(
                calls.iter().any(|c| c.contains("203.0.113.7") && c.contains(port)),
                "{} port {}",
                kind,
                port
            );
        }
    }
}
