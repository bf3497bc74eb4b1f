/*!
Random peer-to-peer network topologies

[`Topology::generate`] builds a connected random graph in which every peer's
degree lies within a configured range. Peers are labelled slow or fast and low
or high hashing power, with exactly the requested number of slow and
low-hash peers. Each [`Link`] carries a propagation delay, a speed class, and
per-direction queuing state used to compute message delays.

```
use p2p_mining_sim::{sampler::Sampler, topology::{Topology, TopologyConfig}};

let config = TopologyConfig { peers: 12, slow_peers: 4, ..Default::default() };
let topology = Topology::generate(&config, &mut Sampler::from_seed(1)).unwrap();

assert!(topology.is_connected());
```
*/

use std::{
    collections::{BTreeSet, VecDeque},
    ops::RangeInclusive,
};

use tracing::{debug, info};

use crate::{
    event::SimTime,
    node::PeerId,
    sampler::{Sampler, SamplerError},
};

/// Link-speed class of a peer or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Speed {
    Slow,
    Fast,
}

/// Hashing-power class of a peer. High-hash peers have ten times the mining
/// power of low-hash peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashClass {
    Low,
    High,
}

/// How the speed class of a link is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LinkSpeedPolicy {
    /// A link is slow iff either endpoint is slow.
    #[default]
    MinOfEndpoints,
    /// Each link is slow with the given probability, regardless of its
    /// endpoints.
    Independent(f64),
}

/// Parameters of the message delay model. Delays are in seconds, sizes in
/// bits, and bandwidths in bits per second.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkModel {
    pub fast_bandwidth: f64,
    pub slow_bandwidth: f64,
    /// Mean of the exponential jitter term is `jitter_bits / bandwidth`.
    pub jitter_bits: f64,
    /// Range of the per-link propagation delay, sampled uniformly.
    pub propagation: RangeInclusive<SimTime>,
}

impl Default for LinkModel {
    fn default() -> Self {
        Self {
            fast_bandwidth: 100e6,
            slow_bandwidth: 5e6,
            jitter_bits: 96e3,
            propagation: 0.01..=0.5,
        }
    }
}

impl LinkModel {
    #[inline]
    pub fn bandwidth(&self, speed: Speed) -> f64 {
        match speed {
            Speed::Slow => self.slow_bandwidth,
            Speed::Fast => self.fast_bandwidth,
        }
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let positive = |x: f64| x.is_finite() && x > 0.0;

        if !positive(self.fast_bandwidth) || !positive(self.slow_bandwidth) {
            return Err(TopologyError::InvalidLinkModel("bandwidth"));
        }
        if !(self.jitter_bits.is_finite() && self.jitter_bits >= 0.0) {
            return Err(TopologyError::InvalidLinkModel("jitter"));
        }

        let (low, high) = (*self.propagation.start(), *self.propagation.end());
        if !(low.is_finite() && high.is_finite() && 0.0 <= low && low <= high)
        {
            return Err(TopologyError::InvalidLinkModel("propagation delay"));
        }

        Ok(())
    }
}

/// Inputs to [`Topology::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    pub peers: usize,
    pub slow_peers: usize,
    pub low_hash_peers: usize,
    /// Allowed number of neighbors of each peer.
    pub degree: RangeInclusive<usize>,
    /// Number of graphs generated before giving up.
    pub retry_budget: usize,
    pub link_speed: LinkSpeedPolicy,
    pub link_model: LinkModel,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            peers: 10,
            slow_peers: 0,
            low_hash_peers: 0,
            degree: 3..=6,
            retry_budget: 1000,
            link_speed: LinkSpeedPolicy::default(),
            link_model: LinkModel::default(),
        }
    }
}

impl TopologyConfig {
    /// Checks that a topology satisfying this configuration can exist.
    pub fn validate(&self) -> Result<(), TopologyError> {
        use TopologyError::*;

        let n = self.peers;
        let (min, max) = (*self.degree.start(), *self.degree.end());

        if n == 0 {
            return Err(NoPeers);
        }
        if self.slow_peers > n {
            return Err(TooManySlowPeers {
                requested: self.slow_peers,
                peers: n,
            });
        }
        if self.low_hash_peers > n {
            return Err(TooManyLowHashPeers {
                requested: self.low_hash_peers,
                peers: n,
            });
        }
        let infeasible = min > max
            || min > n - 1
            || (n > 1 && max == 0)
            || (min == max && (n * min) % 2 == 1);
        if infeasible {
            return Err(InfeasibleDegree { min, max, peers: n });
        }
        if self.retry_budget == 0 {
            return Err(RetriesExhausted(0));
        }
        if let LinkSpeedPolicy::Independent(p) = self.link_speed {
            if !(0.0..=1.0).contains(&p) {
                return Err(InvalidLinkModel("slow link probability"));
            }
        }

        self.link_model.validate()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("cannot build a topology without peers")]
    NoPeers,
    #[error("{requested} slow peers requested, but there are {peers} peers")]
    TooManySlowPeers { requested: usize, peers: usize },
    #[error("{requested} low-hash peers requested out of {peers} peers")]
    TooManyLowHashPeers { requested: usize, peers: usize },
    #[error("degree range {min}..={max} is infeasible for {peers} peers")]
    InfeasibleDegree { min: usize, max: usize, peers: usize },
    #[error("no connected topology found after {0} attempts")]
    RetriesExhausted(usize),
    #[error("invalid link model: {0}")]
    InvalidLinkModel(&'static str),
    #[error("adversary degree {requested} must be in 1..={honest}")]
    AdversaryDegree { requested: usize, honest: usize },
    #[error("link references unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer {0} cannot link to itself")]
    SelfLoop(PeerId),
    #[error("peers {0} and {1} are linked more than once")]
    DuplicateLink(PeerId, PeerId),
    #[error("topology is not connected")]
    Disconnected,
    #[error("peer {peer} has degree {degree} outside the allowed range")]
    DegreeOutOfRange { peer: PeerId, degree: usize },
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

/// Labels of a single peer in a [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub speed: Speed,
    pub hash_class: HashClass,
    /// Whether this peer was added by [`Topology::add_adversary`].
    pub adversary: bool,
}

/// Undirected link between two peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub a: PeerId,
    pub b: PeerId,
    pub speed: Speed,
    /// Fixed light propagation delay of the link.
    pub propagation: SimTime,
    /// Time at which each direction (a to b, b to a) finishes transmitting
    /// its last queued message.
    busy_until: [SimTime; 2],
}

impl Link {
    pub fn new(
        a: PeerId,
        b: PeerId,
        speed: Speed,
        propagation: SimTime,
    ) -> Self {
        Self { a, b, speed, propagation, busy_until: [0.0; 2] }
    }

    /// The endpoint of this link which is not `peer`.
    #[inline]
    pub fn other(&self, peer: PeerId) -> PeerId {
        if peer == self.a {
            self.b
        } else {
            self.a
        }
    }

    #[inline]
    fn direction(&self, from: PeerId) -> usize {
        usize::from(from != self.a)
    }
}

/// A peer graph together with the state of its links.
#[derive(Debug, Clone)]
pub struct Topology {
    peers: Vec<PeerInfo>,
    links: Vec<Link>,
    /// Neighbors of each peer with the index of the connecting link, sorted
    /// by neighbor.
    adjacency: Vec<Vec<(PeerId, usize)>>,
    link_speed: LinkSpeedPolicy,
    model: LinkModel,
    /// Number of generated graphs rejected before this one was accepted.
    pub retries: usize,
    /// How many of the rejected graphs were complete but disconnected. The
    /// others reached a dead end while adding links.
    pub disconnected: usize,
}

impl Topology {
    /// Generates a connected random topology according to `config`.
    pub fn generate(
        config: &TopologyConfig,
        sampler: &mut Sampler,
    ) -> Result<Self, TopologyError> {
        config.validate()?;

        let n = config.peers;
        let slow: BTreeSet<_> =
            sampler.distinct(n, config.slow_peers)?.into_iter().collect();
        let low: BTreeSet<_> =
            sampler.distinct(n, config.low_hash_peers)?.into_iter().collect();

        let peers: Vec<_> = (0..n)
            .map(|i| PeerInfo {
                id: PeerId(i),
                speed: if slow.contains(&i) {
                    Speed::Slow
                } else {
                    Speed::Fast
                },
                hash_class: if low.contains(&i) {
                    HashClass::Low
                } else {
                    HashClass::High
                },
                adversary: false,
            })
            .collect();

        let mut disconnected = 0;
        for attempt in 0..config.retry_budget {
            let Some(adjacency) = random_graph(n, &config.degree, sampler)
            else {
                debug!(attempt, "topology generation reached a dead end");
                continue;
            };
            if !connected(&adjacency) {
                debug!(attempt, "rejected disconnected topology");
                disconnected += 1;
                continue;
            }

            let mut topology = Self::empty(
                peers.clone(),
                config.link_speed,
                config.link_model.clone(),
            );
            for (u, neighbors) in adjacency.iter().enumerate() {
                for &v in neighbors.range(u + 1..) {
                    topology.connect(PeerId(u), PeerId(v), sampler)?;
                }
            }
            topology.retries = attempt;
            topology.disconnected = disconnected;

            info!(
                peers = n,
                links = topology.links.len(),
                retries = attempt,
                disconnected,
                "generated connected topology"
            );
            return Ok(topology);
        }

        Err(TopologyError::RetriesExhausted(config.retry_budget))
    }

    /// Builds a topology from explicit links, without checking connectivity
    /// or degrees (see [`Topology::validate`]).
    pub fn from_links<I>(
        peers: Vec<PeerInfo>,
        links: I,
        model: LinkModel,
    ) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = Link>,
    {
        let mut topology =
            Self::empty(peers, LinkSpeedPolicy::MinOfEndpoints, model);
        for link in links {
            topology.push_link(link)?;
        }

        Ok(topology)
    }

    fn empty(
        peers: Vec<PeerInfo>,
        link_speed: LinkSpeedPolicy,
        model: LinkModel,
    ) -> Self {
        let adjacency = vec![vec![]; peers.len()];
        Self {
            peers,
            links: vec![],
            adjacency,
            link_speed,
            model,
            retries: 0,
            disconnected: 0,
        }
    }

    /// Links `a` and `b`, sampling the link's speed and propagation delay.
    fn connect(
        &mut self,
        a: PeerId,
        b: PeerId,
        sampler: &mut Sampler,
    ) -> Result<(), TopologyError> {
        let speed = match self.link_speed {
            LinkSpeedPolicy::MinOfEndpoints => {
                self.peers[a.0].speed.min(self.peers[b.0].speed)
            }
            LinkSpeedPolicy::Independent(p) => {
                if sampler.bernoulli(p) {
                    Speed::Slow
                } else {
                    Speed::Fast
                }
            }
        };
        let range = &self.model.propagation;
        let propagation = sampler.uniform(*range.start(), *range.end())?;

        self.push_link(Link::new(a, b, speed, propagation))
    }

    fn push_link(&mut self, link: Link) -> Result<(), TopologyError> {
        let n = self.peers.len();
        for peer in [link.a, link.b] {
            if peer.0 >= n {
                return Err(TopologyError::UnknownPeer(peer));
            }
        }
        if link.a == link.b {
            return Err(TopologyError::SelfLoop(link.a));
        }
        if self.link_between(link.a, link.b).is_some() {
            return Err(TopologyError::DuplicateLink(link.a, link.b));
        }

        let index = self.links.len();
        for (from, to) in [(link.a, link.b), (link.b, link.a)] {
            let neighbors = &mut self.adjacency[from.0];
            let pos = neighbors.partition_point(|&(p, _)| p < to);
            neighbors.insert(pos, (to, index));
        }
        self.links.push(link);

        Ok(())
    }

    /// Adds an adversary peer linked to `degree` distinct honest peers chosen
    /// uniformly at random. Adversary links do not count towards the degree
    /// range of honest peers.
    pub fn add_adversary(
        &mut self,
        degree: usize,
        sampler: &mut Sampler,
    ) -> Result<PeerId, TopologyError> {
        let honest = self.peers.len();
        if degree == 0 || degree > honest {
            return Err(TopologyError::AdversaryDegree {
                requested: degree,
                honest,
            });
        }

        let id = PeerId(honest);
        self.peers.push(PeerInfo {
            id,
            speed: Speed::Fast,
            hash_class: HashClass::High,
            adversary: true,
        });
        self.adjacency.push(vec![]);

        for peer in sampler.distinct(honest, degree)? {
            self.connect(id, PeerId(peer), sampler)?;
        }
        info!(%id, degree, "added adversary to topology");

        Ok(id)
    }

    #[inline]
    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    #[inline]
    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    #[inline]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    #[inline]
    pub fn model(&self) -> &LinkModel {
        &self.model
    }

    /// Neighbors of `peer`, in ascending order of ID.
    pub fn neighbors(&self, peer: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        self.adjacency[peer.0].iter().map(|&(p, _)| p)
    }

    #[inline]
    pub fn degree(&self, peer: PeerId) -> usize {
        self.adjacency[peer.0].len()
    }

    pub fn link_between(&self, a: PeerId, b: PeerId) -> Option<&Link> {
        self.link_index(a, b).map(|index| &self.links[index])
    }

    fn link_index(&self, a: PeerId, b: PeerId) -> Option<usize> {
        let neighbors = self.adjacency.get(a.0)?;
        neighbors
            .binary_search_by_key(&b, |&(p, _)| p)
            .ok()
            .map(|i| neighbors[i].1)
    }

    /// Removes the link between `a` and `b`, returning whether it existed.
    pub fn remove_link(&mut self, a: PeerId, b: PeerId) -> bool {
        let Some(index) = self.link_index(a, b) else {
            return false;
        };

        self.links.swap_remove(index);
        let moved = self.links.len();
        for neighbors in self.adjacency.iter_mut() {
            neighbors.retain(|&(_, i)| i != index);
            // The link previously at the end now lives at `index`
            for entry in neighbors.iter_mut().filter(|(_, i)| *i == moved) {
                entry.1 = index;
            }
        }

        true
    }

    /// Returns true iff every peer can reach every other peer.
    pub fn is_connected(&self) -> bool {
        let adjacency: Vec<BTreeSet<usize>> = self
            .adjacency
            .iter()
            .map(|neighbors| neighbors.iter().map(|(p, _)| p.0).collect())
            .collect();

        connected(&adjacency)
    }

    /// Checks that the topology is connected and that every honest peer has a
    /// number of honest neighbors within `degree`.
    pub fn validate(
        &self,
        degree: &RangeInclusive<usize>,
    ) -> Result<(), TopologyError> {
        if !self.is_connected() {
            return Err(TopologyError::Disconnected);
        }

        for info in self.peers.iter().filter(|info| !info.adversary) {
            let honest_degree = self
                .neighbors(info.id)
                .filter(|p| !self.peers[p.0].adversary)
                .count();
            if !degree.contains(&honest_degree) {
                return Err(TopologyError::DegreeOutOfRange {
                    peer: info.id,
                    degree: honest_degree,
                });
            }
        }

        Ok(())
    }

    /// Queues a message of `size_bits` from `from` to its neighbor `to` at
    /// time `now`, returning the time it arrives.
    ///
    /// The delay is the wait for earlier messages in the same direction, plus
    /// the transmission time `size / bandwidth`, plus the link's propagation
    /// delay, plus exponential jitter with mean `jitter_bits / bandwidth`.
    ///
    /// ## Panics
    /// Panics if `from` and `to` are not neighbors.
    pub fn transmit(
        &mut self,
        from: PeerId,
        to: PeerId,
        size_bits: f64,
        now: SimTime,
        sampler: &mut Sampler,
    ) -> Result<SimTime, SamplerError> {
        let index = self
            .link_index(from, to)
            .unwrap_or_else(|| panic!("{} and {} are not neighbors", from, to));

        let link = &mut self.links[index];
        let bandwidth = self.model.bandwidth(link.speed);
        let jitter = match self.model.jitter_bits {
            bits if bits > 0.0 => sampler.exponential(bits / bandwidth)?,
            _ => 0.0,
        };

        let direction = link.direction(from);
        let start = now.max(link.busy_until[direction]);
        let transmitted = start + size_bits / bandwidth;
        link.busy_until[direction] = transmitted;

        Ok(transmitted + link.propagation + jitter)
    }
}

/// Adds random links until every peer reaches a randomly chosen target degree
/// within `degree`. Returns `None` if some peer can no longer reach its
/// target.
fn random_graph(
    n: usize,
    degree: &RangeInclusive<usize>,
    sampler: &mut Sampler,
) -> Option<Vec<BTreeSet<usize>>> {
    let (min, max) = (*degree.start(), (*degree.end()).min(n - 1));
    let targets: Vec<_> = (0..n)
        .map(|_| min + sampler.index(max.saturating_sub(min) + 1))
        .collect();

    let mut adjacency = vec![BTreeSet::new(); n];
    loop {
        let needy: Vec<_> =
            (0..n).filter(|&u| adjacency[u].len() < targets[u]).collect();
        if needy.is_empty() {
            return Some(adjacency);
        }

        let u = needy[sampler.index(needy.len())];
        let candidates: Vec<_> = (0..n)
            .filter(|&v| {
                v != u && !adjacency[u].contains(&v) && adjacency[v].len() < max
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let v = candidates[sampler.index(candidates.len())];
        adjacency[u].insert(v);
        adjacency[v].insert(u);
    }
}

fn connected(adjacency: &[BTreeSet<usize>]) -> bool {
    if adjacency.is_empty() {
        return true;
    }

    let mut visited = vec![false; adjacency.len()];
    let mut queue = VecDeque::from([0]);
    visited[0] = true;

    while let Some(u) = queue.pop_front() {
        for &v in &adjacency[u] {
            if !visited[v] {
                visited[v] = true;
                queue.push_back(v);
            }
        }
    }

    visited.into_iter().all(|v| v)
}
