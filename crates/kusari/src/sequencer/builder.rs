use super::{ItemHandler, ItemResult, Sequencer};
use crate::{destination::Destination, error::ConstructionError, fetch::Fetcher, Target};

/// Configures and builds a [`Sequencer`].
///
/// Without [`on_item`](SequencerBuilder::on_item), results are dropped and
/// the sequence can only be observed through its progress.
pub struct SequencerBuilder {
    destination: Destination,
    handler: Option<ItemHandler>,
}

impl SequencerBuilder {
    pub fn new() -> Self {
        Self {
            destination: Destination::Memory,
            handler: None,
        }
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn on_item(mut self, handler: impl FnMut(ItemResult) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Parse `targets` as urls and build the sequencer.
    pub fn build<F, I, T>(self, fetcher: F, targets: I) -> Result<Sequencer<F>, ConstructionError>
    where
        F: Fetcher,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let input = input.as_ref();
                input
                    .parse::<Target>()
                    .map_err(|source| ConstructionError::InvalidTarget {
                        index,
                        input: input.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.build_with_targets(fetcher, targets)
    }

    /// Build the sequencer from already parsed targets.
    pub fn build_with_targets<F>(
        self,
        fetcher: F,
        targets: Vec<Target>,
    ) -> Result<Sequencer<F>, ConstructionError>
    where
        F: Fetcher,
    {
        let handler = self
            .handler
            .unwrap_or_else(|| Box::new(|_: ItemResult| {}));
        Sequencer::with_targets(fetcher, targets, &self.destination, handler)
    }
}

impl Default for SequencerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
