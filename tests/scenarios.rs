use p2p_mining_sim::{prelude::*, topology};

fn attack_config(
    strategy: Strategy,
    hash_fraction: f64,
    seed: u64,
) -> SimulationConfig {
    SimulationConfig {
        topology: TopologyConfig { peers: 10, ..Default::default() },
        node: NodeParams { block_mean: 10.0, ..Default::default() },
        horizon: 2_000.0,
        attack: Some(AttackConfig {
            strategy,
            hash_fraction,
            degree: 4,
            relay_blocks: false,
        }),
        seed,
        ..Default::default()
    }
}

fn run(config: SimulationConfig) -> SimulationOutput {
    Simulation::new(config).and_then(Simulation::run).unwrap()
}

#[test]
fn honest_network_converges() {
    let output = run(SimulationConfig {
        topology: TopologyConfig {
            peers: 10,
            slow_peers: 5,
            low_hash_peers: 5,
            ..Default::default()
        },
        node: NodeParams { block_mean: 100.0, ..Default::default() },
        horizon: 10_000.0,
        seed: 42,
        ..Default::default()
    });

    let genesis = output.peers[0].ledger().genesis();
    for peer in &output.peers {
        let ledger = peer.ledger();
        let id = peer.id();
        assert!(ledger.tip_height() > 0, "{} never extended genesis", id);
        assert_eq!(ledger.genesis(), genesis);
        assert_eq!(ledger.longest_chain()[0], genesis);
        ledger.check_invariants().unwrap();
    }

    let infos = output.topology.peers();
    let slow = infos.iter().filter(|p| p.speed == Speed::Slow);
    assert_eq!(slow.count(), 5);
    let low = infos.iter().filter(|p| p.hash_class == HashClass::Low);
    assert_eq!(low.count(), 5);

    // With a block interval far above the propagation delay, peers agree on
    // all but the most recent blocks
    let reference = output.longest_chain();
    for peer in &output.peers {
        let chain = peer.ledger().longest_chain();
        let settled = chain.len().saturating_sub(3);
        assert_eq!(chain[..settled], reference[..settled]);
    }
}

#[test]
fn dispatch_times_never_decrease() {
    let config = attack_config(Strategy::Selfish(Selfish), 0.3, 5);
    let mut sim = Simulation::new(config).unwrap();

    let mut last = 0.0;
    let mut events = 0;
    while let Some(time) = sim.step().unwrap() {
        assert!(time >= last, "event at {} after {}", time, last);
        last = time;
        events += 1;
    }

    assert!(events > 100);
    assert_eq!(sim.now(), 2_000.0);
}

#[test]
fn ledgers_hold_their_invariants() {
    let strategies = [
        Strategy::Selfish(Selfish),
        Strategy::Stubborn(Stubborn::with_trail(1)),
    ];
    for strategy in strategies {
        let output = run(attack_config(strategy, 0.35, 9));

        for peer in &output.peers {
            let ledger = peer.ledger();
            ledger.check_invariants().unwrap();
            for data in ledger.iter() {
                assert!(data.block.balances.iter().all(|&b| b >= 0));
            }
        }
    }
}

#[test]
fn adversary_accounts_for_every_block() {
    let config = attack_config(Strategy::Stubborn(Stubborn::new()), 0.4, 11);
    let mut sim = Simulation::new(config).unwrap();
    let adversary = sim.adversary().unwrap();

    let mut mined = 0;
    while sim.step().unwrap().is_some() {
        let private = sim.peers()[adversary.get()].private_chain();
        let now_mined = private.mined().len();
        assert!(now_mined >= mined);
        mined = now_mined;
    }

    let peer = &sim.peers()[adversary.get()];
    let private = peer.private_chain();
    assert!(mined > 0);
    assert_eq!(
        private.mined().len(),
        private.released().len()
            + private.withheld().len()
            + private.discarded().len()
    );
    for id in private.mined() {
        assert!(peer.ledger().contains(*id));
        assert_eq!(peer.ledger()[id].block.miner_id, Some(adversary));
    }
    for block in private.withheld() {
        assert!(peer.ledger().contains(block.id));
    }
}

#[test]
fn selfish_miner_forces_honest_fork_switch() {
    let switched_onto_adversary = (0..4).any(|seed| {
        let output = run(attack_config(Strategy::Selfish(Selfish), 0.4, seed));
        let adversary = output.adversary.unwrap();

        let switched = output
            .trace
            .of_kind(TraceKind::ForkSwitch)
            .filter(|entry| entry.peer != Some(adversary))
            .any(|entry| {
                let (Some(peer), Some(block)) = (entry.peer, entry.block) else {
                    return false;
                };
                let ledger = output.peers[peer.get()].ledger();
                ledger[block].block.miner_id == Some(adversary)
            });
        switched
    });

    assert!(switched_onto_adversary);
}

#[test]
fn withheld_blocks_are_released() {
    let output = run(attack_config(Strategy::Selfish(Selfish), 0.4, 3));

    assert!(output.trace.count(TraceKind::BlockWithheld) > 0);
    assert!(output.trace.count(TraceKind::BlockReleased) > 0);
    assert!(output.stale_blocks() > 0);
}

#[test]
fn bridge_removal_is_detected() {
    // A path 0 - 1 - 2 - 3 - 4 closed into a ring by 4 - 0
    let peers = (0..5)
        .map(|i| topology::PeerInfo {
            id: PeerId::from(i),
            speed: Speed::Fast,
            hash_class: HashClass::High,
            adversary: false,
        })
        .collect();
    let links = (0..5).map(|i| {
        let (a, b) = (PeerId::from(i), PeerId::from((i + 1) % 5));
        topology::Link::new(a, b, Speed::Fast, 0.1)
    });
    let mut ring =
        Topology::from_links(peers, links, LinkModel::default()).unwrap();
    ring.validate(&(1..=2)).unwrap();

    ring.remove_link(PeerId::from(4), PeerId::from(0));
    ring.validate(&(1..=2)).unwrap();

    ring.remove_link(PeerId::from(1), PeerId::from(2));
    assert!(matches!(
        ring.validate(&(1..=2)),
        Err(topology::TopologyError::Disconnected)
    ));
}
