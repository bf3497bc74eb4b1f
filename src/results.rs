/*!
Control the appearance of simulation result data

# Working with [`ResultsBuilder`]

## Examples

Creating a [`ResultsTable`] after running a simulation group:

```
use p2p_mining_sim::prelude::*;

let group = SimulationBuilder::new()
    .peers(6)
    .horizon(1_000.0)
    .block_mean(50.0)
    .adversary(Strategy::Selfish(Selfish))
    .adversary_power_iter([0.2, 0.4])
    .repeat_all(2)
    .build()
    .unwrap();

let results_builder = group.run_all().unwrap();

let results = results_builder
    .average(Average::Median)  // Median over repeated simulations
    .adversary_revenue()       // Adversary's share of the longest chain
    .simulated_time()          // Include the simulated time of each run
    .adversary_power_func("Ideal SM Revenue", selfish_revenue(0.0))
    .format(Format::CSV)       // Output results as CSV
    .build();

println!("{}", results);
```

# Aggregating Results

With an [`Average`] other than [`Average::None`], each group of repeated runs
becomes a single row. Only columns whose values vary between runs are
averaged; strategy names, constants and functions of the adversary power are
taken from the first run of the group.
*/

use std::{collections::BTreeSet, fmt::Display, num::NonZeroUsize};

use crate::{
    node::PeerId,
    power_dist::PowerValue,
    simulation::SimulationOutput,
    utils::{self, wrap, WrapFunc},
};

/// Floating point precision of results data.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

/// Builder for [`ResultsTable`]. Typically produced by running a
/// [`SimulationGroup`](crate::simulation::SimulationGroup).
#[derive(Debug, Clone)]
pub struct ResultsBuilder {
    average: Average,
    columns: BTreeSet<Column>,
    data: Vec<SimulationOutput>,
    format: Format,
    repeated: NonZeroUsize,
}

/// Describes the appearance of a [`ResultsTable`] table as given by its
/// [`Display`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub enum Format {
    /// Comma-separated, without extra whitespace.
    CSV,
    /// Human-readable.
    #[default]
    PrettyPrint,
}

impl ResultsBuilder {
    /// Create a new [`ResultsBuilder`].
    pub(crate) fn new(
        data: Vec<SimulationOutput>,
        repeated: NonZeroUsize,
    ) -> Self {
        Self {
            data,
            repeated,
            average: Average::default(),
            columns: BTreeSet::default(),
            format: Format::default(),
        }
    }

    /// Include the "Blocks Mined", "Longest Chain Length", "Stale Blocks",
    /// "Fork Switches", "Simulated Time" and adversary columns.
    ///
    /// [`ResultsBuilder::average`] must still be called separately
    /// to create averaged data.
    pub fn all(self) -> Self {
        self.blocks_mined()
            .longest_chain_length()
            .stale_blocks()
            .fork_switches()
            .adversary_revenue()
            .simulated_time()
    }

    /// Average the results of repeated simulations based on the given
    /// [`Average`] type. For types other than [`Average::None`], a column
    /// describing the averaging method will be included in the results table.
    pub fn average(mut self, average: Average) -> Self {
        self.average = average;

        self
    }

    /// Include the "Blocks Mined" column in the results table.
    pub fn blocks_mined(mut self) -> Self {
        self.columns.insert(Column::BlocksMined);

        self
    }

    /// Include a column with title `title` which only contains the given
    /// value.
    pub fn constant<T>(mut self, title: T, value: f64) -> Self
    where
        T: Into<String>,
    {
        self.columns.insert(Column::Constant(wrap!(title, move |_| value)));

        self
    }

    /// Extract the raw [`SimulationOutput`] data from this [`ResultsBuilder`].
    /// Useful for running custom statistical analysis.
    ///
    /// # Ordering
    /// Simulations are run in the same order they are specified using
    /// [`SimulationBuilder`](crate::simulation::SimulationBuilder), with
    /// repeated runs being grouped together. The output data from this method
    /// follows this ordering as well.
    pub fn data(self) -> Vec<SimulationOutput> {
        self.data
    }

    /// Include the "Longest Chain Length" column in the results table.
    pub fn longest_chain_length(mut self) -> Self {
        self.columns.insert(Column::LongestChainLength);

        self
    }

    /// Include the "Stale Blocks" column: mined blocks not on the longest
    /// chain.
    pub fn stale_blocks(mut self) -> Self {
        self.columns.insert(Column::StaleBlocks);

        self
    }

    /// Include the "Fork Switches" column: how often honest peers abandoned
    /// their chain for a competing branch.
    pub fn fork_switches(mut self) -> Self {
        self.columns.insert(Column::ForkSwitches);

        self
    }

    /// Use the hashing power of the adversary as input to `func`, and present
    /// the output in a table column with the given title.
    pub fn adversary_power_func<T, F>(mut self, title: T, func: F) -> Self
    where
        T: Into<String>,
        F: Fn(PowerValue) -> f64 + Send + Sync + 'static,
    {
        self.columns.insert(Column::AdversaryPowerFunction(wrap!(title, func)));

        self
    }

    /// Include the strategy, hashing power and revenue of the adversary.
    pub fn adversary_revenue(mut self) -> Self {
        let adversary = self.data.first().and_then(|output| output.adversary);
        if let Some(id) = adversary {
            self.columns.insert(Column::PeerStrategyName(id));
            self.columns.insert(Column::PeerRevenue(id));
        }

        self
    }

    /// Include a "Peer `X` Strategy" column in the results table for each
    /// peer `X`.
    pub fn strategy_names(mut self) -> Self {
        for id in self.peer_ids() {
            self.columns.insert(Column::PeerStrategyName(id));
        }

        self
    }

    /// Include a "Peer `X` Power" column in the results table for each
    /// peer `X`.
    pub fn powers(mut self) -> Self {
        for id in self.peer_ids() {
            self.columns.insert(Column::PeerPower(id));
        }

        self
    }

    /// Include a "Peer `X` Revenue" column in the results table for each
    /// peer `X`.
    pub fn revenue(mut self) -> Self {
        for id in self.peer_ids() {
            self.columns.insert(Column::PeerRevenue(id));
        }

        self
    }

    /// Include the "Simulated Time" column in the results table.
    pub fn simulated_time(mut self) -> Self {
        self.columns.insert(Column::SimulatedTime);

        self
    }

    /// Specify the [`Format`] of the results table.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;

        self
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        let num_peers =
            self.data.first().map_or(0, |output| output.peers.len());
        (0..num_peers).map(PeerId).collect()
    }

    /// Create new [`ResultsTable`].
    pub fn build(self) -> ResultsTable {
        let ResultsBuilder { average, mut columns, data, format, repeated } =
            self;

        if let Some(id) = data.first().and_then(|output| output.adversary) {
            columns.insert(Column::PeerPower(id));
        }
        match average {
            Average::None => (),
            _ => {
                columns.insert(Column::AverageOf(average));
            }
        }

        let columns = Vec::from_iter(columns);
        let rows = match average {
            Average::None => data
                .iter()
                .map(|output| {
                    columns
                        .iter()
                        .map(|col_type| col_type.get_value(output))
                        .collect()
                })
                .collect(),
            _ => data
                .chunks(repeated.get())
                .map(|outputs| {
                    columns
                        .iter()
                        .map(|col_type| {
                            col_type.get_average_value(average, outputs)
                        })
                        .collect()
                })
                .collect(),
        };

        ResultsTable { columns, format, rows }
    }
}

/// Formatted results from the completion of a
/// [`SimulationGroup`](crate::simulation::SimulationGroup). The results table
/// is given by the struct's [`Display`] implementation, as specified by
/// its [`Format`].
pub struct ResultsTable {
    columns: Vec<Column>,
    format: Format,
    rows: Vec<Vec<ColumnValue>>,
}

impl ResultsTable {
    const SEPARATOR_VERTICAL: char = '|';
    const SEPARATOR_HORIZONTAL: char = '-';

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Number of data rows, not counting the title row.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Display for ResultsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> =
            self.columns.iter().map(|col_type| col_type.to_string()).collect();

        match self.format {
            Format::CSV => {
                write!(f, "{}", titles.join(","))?;

                for row in self.rows.iter() {
                    writeln!(f)?;

                    let row: Vec<_> =
                        row.iter().map(|val| val.to_string()).collect();

                    write!(f, "{}", row.join(","))?;
                }
            }
            Format::PrettyPrint => {
                let mut text_widths: Vec<_> =
                    titles.iter().map(|title| title.len()).collect();

                for row in self.rows.iter() {
                    for (i, val) in row.iter().enumerate() {
                        let val = val.to_string();
                        text_widths[i] = text_widths[i].max(val.len());
                    }
                }

                for (i, title) in titles.into_iter().enumerate() {
                    write!(
                        f,
                        " {:1$} {2}",
                        title,
                        text_widths[i],
                        Self::SEPARATOR_VERTICAL
                    )?;
                }
                writeln!(f)?;

                let total_width = text_widths.iter().map(|x| x + 3).sum();
                for _ in 0..total_width {
                    write!(f, "{}", Self::SEPARATOR_HORIZONTAL)?;
                }

                for row in self.rows.iter() {
                    writeln!(f)?;

                    for (i, val) in row.iter().enumerate() {
                        write!(
                            f,
                            " {:1$} {2}",
                            val.to_string(),
                            text_widths[i],
                            Self::SEPARATOR_VERTICAL
                        )?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Methods of extracting an average/central value from a set of repeated
/// simulations.
///
/// In the process of creating an results table, the given averaging method is
/// only applied to the values of columns which change between runs.
#[repr(u8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Average {
    #[default]
    /// Include all repeated values.
    None,
    /// Arithmetic mean of all values.
    Mean,
    /// Median of all values.
    Median,
    /// Maximum of all values.
    Max,
    /// Minimum of all values.
    Min,
}

/// Type of column that can appear in a data table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Column {
    // Variant order determines the order of columns in results tables:
    // https://doc.rust-lang.org/stable/std/cmp/trait.PartialOrd.html#derivable
    PeerStrategyName(PeerId),
    PeerPower(PeerId),
    PeerRevenue(PeerId),
    AdversaryPowerFunction(WrapFunc<PowerValue, f64>),
    Constant(WrapFunc<(), f64>),
    SimulatedTime,
    AverageOf(Average),
    BlocksMined,
    LongestChainLength,
    StaleBlocks,
    ForkSwitches,
}

/// Value which corresponds to a [`Column`].
#[derive(Debug, Clone)]
enum ColumnValue {
    Text(String),
    Count(usize),
    Float(f64),
}

impl Column {
    /// Whether values of this column differ between repeated runs.
    fn varies(&self) -> bool {
        match &self {
            Self::PeerStrategyName(_)
            | Self::AdversaryPowerFunction(_)
            | Self::Constant(_)
            | Self::SimulatedTime
            | Self::AverageOf(_) => false,
            Self::PeerPower(_)
            | Self::PeerRevenue(_)
            | Self::BlocksMined
            | Self::LongestChainLength
            | Self::StaleBlocks
            | Self::ForkSwitches => true,
        }
    }

    /// Numeric value of a varying column.
    fn number(&self, output: &SimulationOutput) -> f64 {
        match &self {
            Self::PeerPower(id) => output.peers[id.0].hash_power(),
            Self::PeerRevenue(id) => output.revenue_of(*id),
            Self::BlocksMined => output.blocks_mined() as f64,
            Self::LongestChainLength => {
                output.reference_peer().ledger().tip_height() as f64
            }
            Self::StaleBlocks => output.stale_blocks() as f64,
            Self::ForkSwitches => output.fork_switches() as f64,
            _ => unreachable!("column {:?} has no varying value", self),
        }
    }

    fn get_value(&self, output: &SimulationOutput) -> ColumnValue {
        match &self {
            Self::PeerStrategyName(id) => {
                ColumnValue::Text(output.peers[id.0].strategy().name())
            }
            Self::AdversaryPowerFunction(func) => {
                ColumnValue::Float(func.call(output.adversary_power()))
            }
            Self::Constant(func) => ColumnValue::Float(func.call(())),
            Self::SimulatedTime => ColumnValue::Float(output.end_time),
            Self::AverageOf(_) => unreachable!(
                "never need the single value of the average descriptor column"
            ),
            Self::BlocksMined
            | Self::LongestChainLength
            | Self::StaleBlocks
            | Self::ForkSwitches => {
                ColumnValue::Count(self.number(output) as usize)
            }
            Self::PeerPower(_) | Self::PeerRevenue(_) => {
                ColumnValue::Float(self.number(output))
            }
        }
    }

    fn get_average_value(
        &self,
        method: Average,
        data: &[SimulationOutput],
    ) -> ColumnValue {
        if let Self::AverageOf(_) = self {
            return ColumnValue::Count(data.len());
        }
        if !self.varies() {
            return self.get_value(&data[0]);
        }

        let vls: Vec<_> =
            data.iter().map(|output| self.number(output)).collect();
        let avg = match method {
            Average::Mean => vls.iter().sum::<f64>() / vls.len() as f64,
            Average::Median => utils::median_of_floats(vls),
            Average::Max => vls.into_iter().fold(f64::NEG_INFINITY, f64::max),
            Average::Min => vls.into_iter().fold(f64::INFINITY, f64::min),
            Average::None => unreachable!(),
        };

        ColumnValue::Float(avg)
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            Self::AverageOf(method) => match method {
                Average::Mean => write!(f, "Mean Of"),
                Average::Median => write!(f, "Median Of"),
                Average::Max => write!(f, "Max Of"),
                Average::Min => write!(f, "Min Of"),
                Average::None => unreachable!(),
            },
            Self::BlocksMined => write!(f, "Blocks Mined"),
            Self::Constant(func) => write!(f, "{}", func.name()),
            Self::PeerStrategyName(id) => write!(f, "Peer {} Strategy", id.0),
            Self::PeerPower(id) => write!(f, "Peer {} Power", id.0),
            Self::AdversaryPowerFunction(func) => write!(f, "{}", func.name()),
            Self::PeerRevenue(id) => write!(f, "Peer {} Revenue", id.0),
            Self::SimulatedTime => write!(f, "Simulated Time"),
            Self::LongestChainLength => write!(f, "Longest Chain Length"),
            Self::StaleBlocks => write!(f, "Stale Blocks"),
            Self::ForkSwitches => write!(f, "Fork Switches"),
        }
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Count(count) => write!(f, "{}", count),
            Self::Float(value) => {
                write!(f, "{:.1$}", value, FLOAT_PRECISION_DIGITS)
            }
        }
    }
}

/// Returns an instance of the ideal Selfish Miner revenue function from Eyal
/// and Sirer's paper which can be used as input to
/// [`ResultsBuilder::adversary_power_func`]. `gamma` is the fraction of
/// honest power which mines on the selfish branch during a tie.
pub fn selfish_revenue(gamma: f64) -> impl Fn(PowerValue) -> f64 {
    move |a: PowerValue| -> f64 {
        (a * (1.0 - a).powi(2) * (4.0 * a + gamma * (1.0 - 2.0 * a))
            - a.powi(3))
            / (1.0 - a * (1.0 + a * (2.0 - a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationBuilder;

    #[test]
    fn selfish_revenue_matches_known_points() {
        let revenue = selfish_revenue(0.0);

        assert!(revenue(0.0).abs() < 1e-12);
        // Profitability threshold for gamma = 0 is 1/3
        assert!((revenue(1.0 / 3.0) - 1.0 / 3.0).abs() < 1e-9);
        assert!(revenue(0.4) > 0.4);
    }

    #[test]
    fn averaged_rows_per_group() {
        let builder = SimulationBuilder::new()
            .peers(5)
            .horizon(300.0)
            .block_mean(30.0)
            .repeat_all(3)
            .build()
            .unwrap()
            .run_all()
            .unwrap();

        let table = builder.clone().all().average(Average::Mean).build();
        assert_eq!(table.num_rows(), 1);

        let table = builder.all().format(Format::CSV).build();
        assert_eq!(table.num_rows(), 3);
        let csv = table.to_string();
        assert!(csv.starts_with("Simulated Time,Blocks Mined"));
        assert_eq!(csv.lines().count(), 4);
    }
}
