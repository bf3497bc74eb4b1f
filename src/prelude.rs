/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use p2p_mining_sim::prelude::*;
```
*/

use crate::{
    block, blockchain, event, miner, node, power_dist, results, simulation,
    topology, transaction,
};

pub use block::{Block, BlockId};

pub use blockchain::{Ledger, LedgerError};

pub use event::SimTime;

pub use miner::{
    honest::Honest, selfish::Selfish, stubborn::Stubborn, OnMine, OnReceive,
    PrivateChain, Strategy,
};

pub use node::{NodeParams, Peer, PeerId};

pub use power_dist::{
    Percent, PowerDistribution, PowerDistributionError, PowerValue,
};

pub use results::{
    selfish_revenue, Average, Format, ResultsBuilder, ResultsTable,
};

pub use simulation::{
    trace::{Trace, TraceEntry, TraceKind},
    AttackConfig, Simulation, SimulationBuildError, SimulationBuilder,
    SimulationConfig, SimulationError, SimulationGroup, SimulationOutput,
};

pub use topology::{
    HashClass, LinkModel, LinkSpeedPolicy, Speed, Topology, TopologyConfig,
};

pub use transaction::{Coins, Transaction, TxnId};
