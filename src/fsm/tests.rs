// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! End-to-end tests of the state machine against mocked collaborators.

use std::fs;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use super::*;
use crate::description::{Protocol, ServerDescription, WIRED_PRIORITY, WIRELESS_PRIORITY};
use crate::routing::SignalClass;
use crate::testing::{MockCache, MockInit, MockLinks, MockNetworkManager, MockObserver};

const ORIGINAL_RESOLV_CONF: &str = "nameserver 192.0.2.1\n";

struct Harness {
    core: Core,
    cache: MockCache,
    init: MockInit,
    nm: MockNetworkManager,
    observer: MockObserver,
    resolv_conf: PathBuf,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(|_| ())
    }

    fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let resolv_conf = dir.path().join("resolv.conf");
        fs::write(&resolv_conf, ORIGINAL_RESOLV_CONF).unwrap();
        let mut settings = Settings {
            resolv_conf_path: resolv_conf.clone(),
            ..Settings::default()
        };
        adjust(&mut settings);

        let cache = MockCache::default();
        let init = MockInit::default();
        let nm = MockNetworkManager::standard();
        let observer = MockObserver::default();
        let core = Core::new(
            &settings,
            Collaborators {
                cache: Box::new(cache.clone()),
                init: Box::new(init.clone()),
                network_manager: Box::new(nm.clone()),
                links: Box::new(MockLinks::standard()),
                observer: Box::new(observer.clone()),
            },
        );
        Self {
            core,
            cache,
            init,
            nm,
            observer,
            resolv_conf,
            _dir: dir,
        }
    }

    /// Completes the most recently submitted job with `result`.
    fn finish_job(&mut self, result: &str) {
        let id = self.init.last_id();
        self.core.handle(Event::JobRemoved {
            id,
            unit: "unbound.service".to_owned(),
            result: result.to_owned(),
        });
    }

    /// Starts the daemon and brings it to the running state.
    fn started() -> Self {
        let mut harness = Self::new();
        harness.start();
        harness
    }

    fn start(&mut self) {
        self.core.handle(Event::Kickoff);
        assert_eq!(self.core.state(), State::WaitingForStartJob);
        self.finish_job("done");
        assert_eq!(self.core.state(), State::Running);
        self.cache.clear();
    }

    fn update(&mut self, servers: Vec<ServerDescription>) -> u32 {
        let (serial, _) = self.core.update(servers, ResolvingMode::Free);
        self.core.publish_serial();
        serial
    }

    fn stop(&mut self) {
        self.core.handle(Event::Stop);
        assert_eq!(self.core.state(), State::WaitingStopJob);
        self.finish_job("done");
        assert!(self.core.is_finished());
    }

    fn resolv_conf(&self) -> String {
        fs::read_to_string(&self.resolv_conf).unwrap()
    }

    fn routes(&self) -> Vec<(u32, String)> {
        self.core
            .routing
            .managed_routes()
            .into_iter()
            .map(|(index, route)| (index, route.dest.to_string()))
            .collect()
    }
}

fn global(address: &str) -> ServerDescription {
    ServerDescription::new(address.parse().unwrap(), WIRED_PRIORITY)
}

fn bound(address: &str, interface: u32, priority: u32, domains: &[&str]) -> ServerDescription {
    let mut server = ServerDescription::new(address.parse().unwrap(), priority);
    server.interface = Some(interface);
    server.routing_domains = domains.iter().map(|d| d.to_string()).collect();
    server
}

////////////////////////////////////////////////////////////////////////
// SCENARIOS                                                          //
////////////////////////////////////////////////////////////////////////

#[test]
fn single_global_forwarder_is_published() {
    let mut h = Harness::started();
    assert!(h.cache.configuration().unwrap().contains("interface: 127.0.0.1"));

    let serial = h.update(vec![global("192.0.2.53")]);
    assert_eq!(serial, 2);
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(
        h.cache.commands(),
        vec!["forward_add . 192.0.2.53", "flush_zone ."]
    );
    assert!(h.resolv_conf().starts_with("nameserver 127.0.0.1\n"));
    assert_eq!(h.core.committed_serial().get(), 2);
    assert_eq!(h.observer.published(), vec![2]);
}

#[test]
fn dns_over_tls_forwarders_are_flagged() {
    let mut h = Harness::started();
    let mut server = global("192.0.2.53");
    server.protocol = Protocol::DnsOverTls;
    server.port = Some(853);
    server.name = Some("dns.example".to_owned());
    h.update(vec![server]);

    let commands = h.cache.commands();
    assert_eq!(commands[0], "forward_add +t . 192.0.2.53@853#dns.example");
}

#[test]
fn interface_forwarders_get_split_zones_and_routes_only_when_remote() {
    let mut h = Harness::started();
    let mut local = bound("10.0.0.1", 2, WIRED_PRIORITY, &["corp.example"]);
    local.networks = vec!["10.0.0.0/24".parse().unwrap()];
    h.update(vec![local]);

    let zones: Vec<String> = h.core.cache.zones().keys().cloned().collect();
    assert_eq!(zones, vec!["0.0.10.in-addr.arpa", "corp.example"]);
    assert!(h.routes().is_empty());

    let mut remote = bound("192.0.2.1", 2, WIRED_PRIORITY, &["corp.example"]);
    remote.networks = vec!["10.0.0.0/24".parse().unwrap()];
    h.update(vec![remote]);
    assert_eq!(h.routes(), vec![(2, "192.0.2.1".to_owned())]);
    let route = h.nm.connection("eth0").ipv4.routes[0].clone();
    assert_eq!(route.prefix, 32);
    assert_eq!(route.next_hop, Some("10.0.0.254".parse().unwrap()));
    assert_eq!(h.core.state(), State::Running);
}

#[test]
fn wired_interface_wins_a_shared_forwarder() {
    let mut h = Harness::started();
    h.update(vec![
        bound("192.0.2.53", 3, WIRELESS_PRIORITY, &["."]),
        bound("192.0.2.53", 2, WIRED_PRIORITY, &["."]),
    ]);
    assert_eq!(h.routes(), vec![(2, "192.0.2.53".to_owned())]);
    assert_eq!(h.nm.reapply_count("wlan0"), 0);
    assert_eq!(h.core.cache.zones()["."].servers, vec!["192.0.2.53"]);
}

#[test]
fn update_while_waiting_for_ip_objects_restarts_reconciliation() {
    let mut h = Harness::started();
    h.nm.set_lag(true);
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.core.state(), State::WaitIpObjects);
    assert!(h.cache.commands().is_empty());

    h.update(vec![bound("192.0.2.99", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.core.state(), State::WaitIpObjects);

    h.nm.set_lag(false);
    h.nm.sync_ip_configs();
    let generation = h.core.generations().current(SignalClass::IpConfig);
    let path = h.nm.ip_config_path("eth0", crate::description::AddressFamily::V4);
    h.core.handle_signal(NmSignal::IpConfig { path }, generation);

    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.routes(), vec![(2, "192.0.2.99".to_owned())]);
    let connection = h.nm.connection("eth0");
    assert!(connection.ipv4.host_route("192.0.2.53".parse().unwrap()).is_none());
    assert_eq!(h.core.cache.zones()["."].servers, vec!["192.0.2.99"]);
    assert_eq!(h.core.committed_serial().get(), 3);
}

////////////////////////////////////////////////////////////////////////
// PROPERTIES                                                         //
////////////////////////////////////////////////////////////////////////

#[test]
fn reconciling_again_without_changes_writes_nothing() {
    let mut h = Harness::started();
    h.update(vec![
        bound("192.0.2.53", 2, WIRED_PRIORITY, &["."]),
        bound("198.51.100.7", 3, WIRELESS_PRIORITY, &["home.example"]),
    ]);
    let reapplies = h.nm.total_reapplies();
    h.cache.clear();

    h.core.handle(Event::InterfaceUp);
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.nm.total_reapplies(), reapplies);
    assert!(h.cache.commands().is_empty());
}

#[test]
fn no_routes_survive_an_empty_update_and_shutdown() {
    let candidates = [
        ("192.0.2.53", 2),
        ("192.0.2.54", 2),
        ("198.51.100.7", 3),
        ("203.0.113.9", 4),
        ("10.0.0.7", 2),
        ("2001:db8:53::1", 2),
    ];
    let mut rng = StdRng::seed_from_u64(0x0e0e);
    for _ in 0..8 {
        let mut h = Harness::started();
        for _ in 0..rng.gen_range(1..6) {
            let servers = candidates
                .iter()
                .filter(|_| rng.gen_bool(0.5))
                .map(|(address, index)| {
                    let priority = if *index == 3 {
                        WIRELESS_PRIORITY
                    } else {
                        WIRED_PRIORITY
                    };
                    bound(address, *index, priority, &["."])
                })
                .collect();
            h.update(servers);
            assert_eq!(h.core.state(), State::Running);
        }
        h.update(Vec::new());
        assert!(h.routes().is_empty());
        h.stop();
        assert!(h.routes().is_empty());
        for name in ["eth0", "wlan0", "eth1"] {
            let connection = h.nm.connection(name);
            assert!(connection.ipv4.routes.is_empty(), "{}", name);
            assert!(connection.ipv6.routes.is_empty(), "{}", name);
        }
    }
}

#[test]
fn serials_increase_with_every_update_and_publish_once() {
    let mut h = Harness::started();
    let mut previous = h.core.committed_serial().get();
    for i in 0..5 {
        let serial = h.update(vec![global(&format!("192.0.2.{}", i + 1))]);
        assert_eq!(serial, previous + 1);
        previous = serial;
    }
    assert_eq!(h.observer.published(), vec![2, 3, 4, 5, 6]);
    h.core.publish_serial();
    assert_eq!(h.observer.published().len(), 5);
}

#[test]
fn restrictive_modes_keep_interface_servers_away_from_the_root() {
    let mut h = Harness::started();
    let servers = vec![
        global("192.0.2.1"),
        bound("10.0.0.53", 2, WIRED_PRIORITY, &[".", "corp.example"]),
    ];
    h.core.update(servers.clone(), ResolvingMode::RestrictGlobal);
    assert_eq!(h.core.cache.zones()["."].servers, vec!["192.0.2.1"]);
    assert!(h.core.cache.zones().contains_key("corp.example"));

    h.core.update(servers, ResolvingMode::FullRestrictive);
    assert!(!h.core.cache.zones().contains_key("corp.example"));
}

////////////////////////////////////////////////////////////////////////
// LIFECYCLE                                                          //
////////////////////////////////////////////////////////////////////////

#[test]
fn graceful_shutdown_restores_resolv_conf() {
    let mut h = Harness::started();
    h.update(vec![global("192.0.2.53")]);
    h.stop();
    assert_eq!(h.core.exit_code(), ExitCode::Graceful);
    assert_eq!(h.resolv_conf(), ORIGINAL_RESOLV_CONF);
    let jobs: Vec<JobKind> = h.init.submitted().into_iter().map(|(k, _)| k).collect();
    assert_eq!(jobs, vec![JobKind::Start, JobKind::Stop]);
}

#[test]
fn failed_start_job_exits_with_service_failure() {
    let mut h = Harness::new();
    h.core.handle(Event::Kickoff);
    h.finish_job("failed");
    assert!(h.core.is_finished());
    assert_eq!(h.core.state(), State::Stopping);
    assert_eq!(h.core.exit_code(), ExitCode::ServiceFailure);
    assert_eq!(h.resolv_conf(), ORIGINAL_RESOLV_CONF);
}

#[test]
fn refused_start_job_exits_with_dbus_failure() {
    let mut h = Harness::new();
    h.init.refuse_jobs(true);
    h.core.handle(Event::Kickoff);
    assert!(h.core.is_finished());
    assert_eq!(h.core.exit_code(), ExitCode::DbusFailure);
}

#[test]
fn stop_before_the_cache_started_waits_for_the_start_job() {
    let mut h = Harness::new();
    h.core.handle(Event::Kickoff);
    assert!(!h.core.reload().0);
    h.core.handle(Event::Stop);
    assert_eq!(h.core.state(), State::WaitingToSubmitStopJob);
    assert_eq!(h.core.update(vec![global("192.0.2.53")], ResolvingMode::Free).0, 0);

    h.finish_job("done");
    assert_eq!(h.core.state(), State::WaitingStopJob);
    h.finish_job("done");
    assert!(h.core.is_finished());
    assert_eq!(h.core.exit_code(), ExitCode::Graceful);
}

#[test]
fn updates_before_the_start_job_finishes_are_applied_afterwards() {
    let mut h = Harness::new();
    h.core.handle(Event::Kickoff);
    assert_eq!(h.core.update(vec![global("192.0.2.53")], ResolvingMode::Free).0, 2);
    assert!(h.cache.commands().is_empty());
    h.finish_job("done");
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.core.cache.zones()["."].servers, vec!["192.0.2.53"]);
}

#[test]
fn failed_stop_job_still_removes_routes() {
    let mut h = Harness::started();
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.routes().len(), 1);
    h.core.handle(Event::Stop);
    h.finish_job("failed");
    assert!(h.core.is_finished());
    assert_eq!(h.core.exit_code(), ExitCode::ServiceFailure);
    assert!(h.routes().is_empty());
    assert!(h.nm.connection("eth0").ipv4.routes.is_empty());
}

#[test]
fn missing_gateways_are_retried_on_a_timer() {
    let mut h = Harness::started();
    h.nm.clear_gateways("eth0");
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.core.state(), State::UnsubscribeNmAndWait);
    assert!(h.core.timer_deadline().is_some());

    h.core.fire_timer();
    assert_eq!(h.core.state(), State::UnsubscribeNmAndWait);

    h.nm.set_gateway("eth0", "10.0.0.254".parse().unwrap());
    h.core.fire_timer();
    assert_eq!(h.core.state(), State::Running);
    assert!(h.core.timer_deadline().is_none());
    h.stop();
    assert_eq!(h.core.exit_code(), ExitCode::Graceful);
}

#[test]
fn unrecovered_routing_failures_set_the_exit_code() {
    let mut h = Harness::started();
    h.nm.clear_gateways("eth0");
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    h.stop();
    assert_eq!(h.core.exit_code(), ExitCode::RouteFailure);
}

#[test]
fn interfaces_going_down_restart_reconciliation() {
    let mut h = Harness::started();
    h.nm.set_device_state("eth0", 30);
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.core.state(), State::WaitAllConnectionsUp);

    let generation = h.core.generations().current(SignalClass::DeviceState);
    h.nm.set_device_state("eth0", DEVICE_STATE_UP);
    h.core.handle_signal(
        NmSignal::DeviceState {
            path: h.nm.device("eth0"),
            new_state: DEVICE_STATE_UP,
            old_state: 30,
        },
        generation,
    );
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.routes().len(), 1);

    let generation = h.core.generations().current(SignalClass::DeviceState);
    h.nm.set_device_state("eth0", 30);
    h.core.handle_signal(
        NmSignal::DeviceState {
            path: h.nm.device("eth0"),
            new_state: 30,
            old_state: DEVICE_STATE_UP,
        },
        generation,
    );
    assert_eq!(h.core.state(), State::WaitAllConnectionsUp);
}

const DEVICE_STATE_UP: u32 = crate::routing::DEVICE_STATE_ACTIVATED;

#[test]
fn reload_restarts_the_cache_and_republishes_zones() {
    let mut h = Harness::started();
    h.update(vec![global("192.0.2.53")]);
    h.cache.clear();

    assert!(h.core.reload().0);
    assert_eq!(h.core.state(), State::WaitingRestartJob);
    assert!(!h.core.reload().0);
    h.finish_job("done");
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(
        h.cache.commands(),
        vec!["forward_add . 192.0.2.53", "flush_zone ."]
    );
}

#[test]
fn failed_restart_shuts_down() {
    let mut h = Harness::started();
    h.core.reload();
    h.finish_job("failed");
    assert_eq!(h.core.state(), State::WaitingStopJob);
    h.finish_job("done");
    assert!(h.core.is_finished());
    assert_eq!(h.core.exit_code(), ExitCode::ServiceFailure);
}

#[test]
fn new_ca_bundles_restart_the_cache() {
    let mut h = Harness::started();
    let mut server = global("192.0.2.53");
    server.protocol = Protocol::DnsOverTls;
    server.ca = Some(PathBuf::from("/etc/pki/corp.pem"));
    h.update(vec![server]);
    assert_eq!(h.core.state(), State::WaitingRestartJob);
    assert_eq!(h.core.committed_serial().get(), 1);

    h.finish_job("done");
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.core.committed_serial().get(), 2);
    assert!(h.cache.commands()[0].starts_with("forward_add +t . "));
    assert!(h
        .cache
        .configuration()
        .unwrap()
        .contains("/etc/pki/corp.pem"));
}

#[test]
fn resolv_conf_failures_stop_the_daemon() {
    let mut h = Harness::with_settings(|s| {
        s.resolv_conf_path = PathBuf::from("/nonexistent/dnsconfd/resolv.conf")
    });
    h.core.handle(Event::Kickoff);
    h.finish_job("done");
    assert_eq!(h.core.state(), State::WaitingStopJob);
    h.finish_job("done");
    assert!(h.core.is_finished());
    assert_eq!(h.core.exit_code(), ExitCode::ResolvConfFailure);
}

#[test]
fn routing_can_be_switched_off() {
    let mut h = Harness::with_settings(|s| s.handle_routing = false);
    h.start();
    h.nm.clear_gateways("eth0");
    h.update(vec![bound("192.0.2.53", 2, WIRED_PRIORITY, &["."])]);
    assert_eq!(h.core.state(), State::Running);
    assert_eq!(h.nm.total_reapplies(), 0);
    assert_eq!(h.core.cache.zones()["."].servers, vec!["192.0.2.53"]);
}

#[test]
fn status_reports_state_and_zones() {
    let mut h = Harness::started();
    h.update(vec![global("192.0.2.53")]);

    let report: serde_json::Value = serde_json::from_str(&h.core.status(true)).unwrap();
    assert_eq!(report["state"], "running");
    assert_eq!(report["configuration_serial"], 2);
    assert_eq!(report["mode"], "free");
    assert_eq!(report["cache"]["."]["servers"][0], "192.0.2.53");

    let text = h.core.status(false);
    assert!(text.starts_with("State: running\n"));
    assert!(text.contains("    . -> 192.0.2.53\n"));
}
