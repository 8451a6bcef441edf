use std::time::Duration;

use keel_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cart::{Cart, ShoppingCart};

/// How long an abandoned cart waits before its customer is reminded.
pub const REMINDER_DELAY: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub order_id: String,
    pub cart_id: String,
    pub item_count: u32,
}

pub struct Checkout {
    client: ComponentClient,
    timers: TimerScheduler,
}

impl Checkout {
    pub fn new(ctx: &ComponentContext) -> Self {
        Checkout {
            client: ctx.component_client().clone(),
            timers: ctx.timers().clone(),
        }
    }

    /// Starts the reminder timer for a cart that has not been checked out.
    pub fn watch(&self, cart_id: String) -> Effect<()> {
        let remind = match self
            .client
            .for_timed_action()
            .method(CartReminder::remind)
        {
            Ok(remind) => remind,
            Err(err) => return Effect::Error(err.into()),
        };
        let timer = reminder_timer(&cart_id);
        match self
            .timers
            .start_single_timer(timer, REMINDER_DELAY, remind.deferred(cart_id))
        {
            Ok(()) => Effect::reply(()),
            Err(err) => Effect::Error(err.into()),
        }
    }

    pub fn check_out(&self, cart_id: String) -> Effect<Receipt> {
        let checkout = match self
            .client
            .for_key_value_entity(cart_id.clone())
            .method(ShoppingCart::checkout)
        {
            Ok(checkout) => checkout,
            Err(err) => return Effect::Error(err.into()),
        };

        self.timers.cancel(&reminder_timer(&cart_id));
        Effect::async_reply(checkout.invoke_async(())).map_reply(move |cart: Cart| Receipt {
            order_id: uuid::Uuid::new_v4().to_string(),
            cart_id,
            item_count: cart.item_count(),
        })
    }
}

impl Action for Checkout {
    const COMPONENT_ID: &'static str = "checkout";

    fn describe(methods: &mut ActionMethods<Self>) {
        methods
            .action(Checkout::watch)
            .action(Checkout::check_out);
    }
}

fn reminder_timer(cart_id: &str) -> String {
    format!("cart-reminder-{cart_id}")
}

pub struct CartReminder;

impl CartReminder {
    pub fn remind(&self, cart_id: String) -> Effect<()> {
        info!(%cart_id, "cart was abandoned, reminding its customer");
        Effect::reply(())
    }
}

impl TimedAction for CartReminder {
    const COMPONENT_ID: &'static str = "cart-reminder";

    fn describe(methods: &mut ActionMethods<Self>) {
        methods.action(CartReminder::remind);
    }
}
