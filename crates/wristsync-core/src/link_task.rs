//! Radio capability trait
//!
//! The sync engine never talks to a Bluetooth stack directly. A `LinkTask`
//! executes [`RadioEffect`](crate::RadioEffect)s and reports what happened as
//! [`RadioEvent`](crate::RadioEvent)s. Implementations:
//! - `BleCentralLink` in `wristsync-ble` (btleplug)
//! - `SimulatedLink` in `wristsync-runtime` (deterministic fake companion)

use crate::channel::{EffectReceiver, RadioEventSender};
use crate::errors::Result;

// ----------------------------------------------------------------------------
// Link Task Trait
// ----------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait LinkTask: Send {
    /// Attach channels created by the runtime
    ///
    /// Implementations store both handles; `event_sender` is the only way data
    /// may reach the engine.
    fn attach_channels(
        &mut self,
        event_sender: RadioEventSender,
        effect_receiver: EffectReceiver,
    ) -> Result<()>;

    /// Run until the effect channel closes
    async fn run(&mut self) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
