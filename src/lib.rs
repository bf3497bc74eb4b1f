/*!
Discrete-event simulator of a peer-to-peer cryptocurrency network.

Peers are connected by a random [topology](topology) of links with
heterogeneous speeds. They generate [transactions](transaction), mine
[blocks](block) at exponentially distributed intervals according to their
hashing power, flood both over the network with realistic per-hop delays, and
each keep their own [ledger](blockchain) of the block tree, following the
longest chain. One peer may instead follow an adversarial
[mining strategy](miner) such as selfish or stubborn mining.

Runs are fully determined by their seed. See [`simulation`] for running a
single network and [`results`] for tabulating groups of runs.
*/

// ## Important Tests:
// - Honest peers only -> revenue is roughly equal to hashing power
// - Selfish Mining revenue -> alpha approaches the closed form from the Eyal
//   paper as propagation delays shrink relative to the block interval

pub mod block;
pub mod blockchain;
pub mod event;
pub mod miner;
pub mod node;
pub mod power_dist;
pub mod prelude;
pub mod results;
pub mod sampler;
pub mod simulation;
pub mod topology;
pub mod transaction;

pub(crate) mod utils;
