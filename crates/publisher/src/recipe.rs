//! Execution recipes and the policy that picks one per handler.

use std::time::Duration;

use crate::registry::HandlerDescriptor;

/// Where a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// In-process, inside the publishing task.
    Local,
    /// Submitted to the background queue.
    Queued,
}

/// One delivery attempt plus what to try if it fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecipe {
    strategy: Strategy,
    timeout: Option<Duration>,
    fallback: Option<Box<ExecutionRecipe>>,
}

impl ExecutionRecipe {
    /// In-process delivery, cut off after `timeout` if given.
    pub fn local(timeout: Option<Duration>) -> Self {
        Self {
            strategy: Strategy::Local,
            timeout,
            fallback: None,
        }
    }

    pub fn queued() -> Self {
        Self {
            strategy: Strategy::Queued,
            timeout: None,
            fallback: None,
        }
    }

    /// Sets the recipe tried when this one fails.
    pub fn fallback_to(mut self, next: ExecutionRecipe) -> Self {
        self.fallback = Some(Box::new(next));
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn fallback(&self) -> Option<&ExecutionRecipe> {
        self.fallback.as_deref()
    }

    /// Walks the chain starting with this recipe.
    pub fn chain(&self) -> impl Iterator<Item = &ExecutionRecipe> {
        std::iter::successors(Some(self), |recipe| recipe.fallback())
    }
}

/// Publisher state a recipe is chosen against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeInputs {
    pub circuit_open: bool,
    pub local_enabled: bool,
    pub nest_level: u32,
    pub max_nest_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeDecision {
    /// Nothing can deliver the event.
    Abort,
    Execute(ExecutionRecipe),
}

/// Picks the recipe chain for one handler.
pub fn select_recipe(descriptor: &HandlerDescriptor, inputs: &RecipeInputs) -> RecipeDecision {
    if inputs.circuit_open {
        return if inputs.local_enabled {
            RecipeDecision::Execute(ExecutionRecipe::local(None))
        } else {
            RecipeDecision::Abort
        };
    }

    let background_first = descriptor.strictly_background
        || !inputs.local_enabled
        || inputs.nest_level >= inputs.max_nest_level;

    let recipe = if background_first {
        let queued = ExecutionRecipe::queued();
        if inputs.local_enabled {
            queued.fallback_to(ExecutionRecipe::local(None))
        } else {
            queued
        }
    } else {
        ExecutionRecipe::local(Some(descriptor.local_timeout))
            .fallback_to(ExecutionRecipe::queued().fallback_to(ExecutionRecipe::local(None)))
    };
    RecipeDecision::Execute(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerId;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn descriptor(strictly_background: bool) -> HandlerDescriptor {
        HandlerDescriptor {
            handler_id: HandlerId::new("h"),
            strictly_background,
            local_timeout: TIMEOUT,
        }
    }

    fn inputs() -> RecipeInputs {
        RecipeInputs {
            circuit_open: false,
            local_enabled: true,
            nest_level: 0,
            max_nest_level: 4,
        }
    }

    fn steps(decision: RecipeDecision) -> Vec<(Strategy, Option<Duration>)> {
        match decision {
            RecipeDecision::Execute(recipe) => recipe
                .chain()
                .map(|r| (r.strategy(), r.timeout()))
                .collect(),
            RecipeDecision::Abort => panic!("expected a recipe"),
        }
    }

    #[test]
    fn healthy_path_is_timed_local_then_queue_then_untimed_local() {
        assert_eq!(
            steps(select_recipe(&descriptor(false), &inputs())),
            [
                (Strategy::Local, Some(TIMEOUT)),
                (Strategy::Queued, None),
                (Strategy::Local, None),
            ]
        );
    }

    #[test]
    fn open_circuit_runs_untimed_local_only() {
        let inputs = RecipeInputs {
            circuit_open: true,
            ..inputs()
        };
        assert_eq!(
            steps(select_recipe(&descriptor(true), &inputs)),
            [(Strategy::Local, None)]
        );
    }

    #[test]
    fn open_circuit_without_local_handling_aborts() {
        let inputs = RecipeInputs {
            circuit_open: true,
            local_enabled: false,
            ..inputs()
        };
        assert_eq!(
            select_recipe(&descriptor(false), &inputs),
            RecipeDecision::Abort
        );
    }

    #[test]
    fn strictly_background_queues_first() {
        assert_eq!(
            steps(select_recipe(&descriptor(true), &inputs())),
            [(Strategy::Queued, None), (Strategy::Local, None)]
        );
    }

    #[test]
    fn max_nest_level_queues_first_even_with_local_enabled() {
        let inputs = RecipeInputs {
            nest_level: 4,
            ..inputs()
        };
        assert_eq!(
            steps(select_recipe(&descriptor(false), &inputs)),
            [(Strategy::Queued, None), (Strategy::Local, None)]
        );

        let shallower = RecipeInputs {
            nest_level: 3,
            ..inputs
        };
        assert_eq!(
            steps(select_recipe(&descriptor(false), &shallower))[0],
            (Strategy::Local, Some(TIMEOUT))
        );
    }

    #[test]
    fn local_disabled_queues_without_fallback() {
        let inputs = RecipeInputs {
            local_enabled: false,
            ..inputs()
        };
        assert_eq!(
            steps(select_recipe(&descriptor(false), &inputs)),
            [(Strategy::Queued, None)]
        );
    }
}
