#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use keel_sdk::prelude::*;
use serde::{Deserialize, Serialize};

// Counter

#[derive(Clone, Debug, Default, PartialEq, Message, Serialize, Deserialize)]
pub struct CounterState {
    pub value: i64,
}

pub struct Counter;

impl Counter {
    pub fn increase(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
        let value = state.value + by;
        update_state(CounterState { value }).then_reply(value)
    }

    pub fn get(&self, state: &CounterState) -> Effect<i64, CounterState> {
        Effect::reply(state.value)
    }

    pub fn reset(&self, _state: &CounterState) -> Effect<(), CounterState> {
        delete_entity().then_reply(())
    }

    pub fn explode(&self, _state: &CounterState) -> Effect<i64, CounterState> {
        panic!("counter exploded")
    }

    pub fn stall(&self, _state: &CounterState) -> Effect<i64, CounterState> {
        Effect::async_reply(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, ErrorReply>(0)
        })
    }

    pub fn increase_later(&self, state: &CounterState, by: i64) -> Effect<i64, CounterState> {
        let value = state.value + by;
        Effect::async_effect(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            update_state(CounterState { value }).then_reply(value)
        })
    }

    /// Echoes a header of the call being handled.
    pub fn header(&self, _state: &CounterState, key: String) -> Effect<Option<String>, CounterState> {
        Effect::reply(metadata::current().get(&key).map(str::to_string))
    }

    pub fn debug_dump(&self, state: &CounterState) -> Effect<String, CounterState> {
        Effect::reply(format!("{state:?}"))
    }

    pub fn undeclared(&self, state: &CounterState) -> Effect<i64, CounterState> {
        Effect::reply(state.value)
    }
}

impl KeyValueEntity for Counter {
    const COMPONENT_ID: &'static str = "counter";
    type State = CounterState;

    fn empty_state(&self) -> CounterState {
        CounterState::default()
    }

    fn describe(methods: &mut EntityMethods<Self, CounterState, CounterState>) {
        methods
            .command(Counter::increase)
            .command(Counter::get)
            .command(Counter::reset)
            .command(Counter::explode)
            .command(Counter::stall)
            .command(Counter::increase_later)
            .command(Counter::header)
            .ignore(Counter::debug_dump);
    }
}

// Shopping cart

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product_id: &str, name: &str, quantity: u32) -> Self {
        Self {
            product_id: product_id.to_string(),
            name: name.to_string(),
            quantity,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<LineItem>,
    pub checked_out: bool,
}

pub struct ShoppingCart;

impl ShoppingCart {
    pub fn add_item(&self, cart: &Cart, item: LineItem) -> Effect<(), Cart> {
        if item.quantity == 0 {
            return Effect::error_with_code("quantity must be positive", ErrorCode::BadRequest);
        }
        let mut cart = cart.clone();
        match cart
            .items
            .iter_mut()
            .find(|existing| existing.product_id == item.product_id)
        {
            Some(existing) => existing.quantity += item.quantity,
            None => cart.items.push(item),
        }
        cart.items.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        update_state(cart).then_reply(())
    }

    pub fn remove_item(&self, cart: &Cart, product_id: String) -> Effect<(), Cart> {
        if !cart.items.iter().any(|item| item.product_id == product_id) {
            return Effect::error(format!(
                "Cannot remove item {product_id} because it is not in the cart."
            ));
        }
        let mut cart = cart.clone();
        cart.items.retain(|item| item.product_id != product_id);
        update_state(cart).then_reply(())
    }

    pub fn get_cart(&self, cart: &Cart) -> Effect<Cart, Cart> {
        Effect::reply(cart.clone())
    }
}

impl KeyValueEntity for ShoppingCart {
    const COMPONENT_ID: &'static str = "shopping-cart";
    type State = Cart;

    fn empty_state(&self) -> Cart {
        Cart::default()
    }

    fn describe(methods: &mut EntityMethods<Self, Cart, Cart>) {
        methods
            .command(ShoppingCart::add_item)
            .command(ShoppingCart::remove_item)
            .command(ShoppingCart::get_cart);
    }
}

// Users and the view over them

#[derive(Clone, Debug, Default, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
}

pub struct UserEntity;

impl UserEntity {
    pub fn create(&self, _user: &User, name: String, email: String) -> Effect<(), User> {
        update_state(User { name, email }).then_reply(())
    }

    pub fn delete(&self, _user: &User) -> Effect<(), User> {
        delete_entity().then_reply(())
    }
}

impl KeyValueEntity for UserEntity {
    const COMPONENT_ID: &'static str = "user";
    type State = User;

    fn empty_state(&self) -> User {
        User::default()
    }

    fn describe(methods: &mut EntityMethods<Self, User, User>) {
        methods
            .command(UserEntity::create)
            .command(UserEntity::delete);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct UserRow {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<UserRow>,
}

pub struct UsersByName;

impl UsersByName {
    pub fn get_user(&self, _name: String) -> QueryEffect<UserRow> {
        QueryEffect::query_result()
    }

    pub fn by_email(&self, _email: String) -> QueryEffect<UserList> {
        QueryEffect::query_result()
    }

    pub fn get_user_with_email(&self, _name: String, _email: String) -> QueryEffect<UserRow> {
        QueryEffect::query_result()
    }

    pub fn forbidden(&self) -> QueryEffect<UserList> {
        QueryEffect::error("listing every user is not allowed")
    }
}

impl View for UsersByName {
    const COMPONENT_ID: &'static str = "users-by-name";

    fn describe(methods: &mut ViewMethods<Self>) {
        methods
            .table("users_by_name")
            .query(
                "SELECT * FROM users_by_name WHERE name = :name",
                UsersByName::get_user,
            )
            .query(
                "SELECT * AS users FROM users_by_name WHERE email = :email",
                UsersByName::by_email,
            )
            .query(
                "SELECT * FROM users_by_name WHERE name = :name AND email = :email",
                UsersByName::get_user_with_email,
            )
            .query("SELECT * AS users FROM users_by_name", UsersByName::forbidden);
        methods
            .consume_key_value_entity::<UserEntity, UserRow>(|user| {
                if user.name.is_empty() {
                    RowEffect::ignore()
                } else {
                    RowEffect::update_row(UserRow {
                        name: user.name.clone(),
                        email: user.email.clone(),
                    })
                }
            })
            .handle_deletes();
    }
}

// Event sourced account

#[derive(Clone, Debug, PartialEq, Message, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    Deposited { amount: u64 },
    Withdrawn { amount: u64 },
}

#[derive(Clone, Debug, Default, PartialEq, Message, Serialize, Deserialize)]
pub struct Balance {
    pub amount: u64,
}

pub struct Account;

impl Account {
    pub fn deposit(&self, balance: &Balance, amount: u64) -> Effect<u64, Vec<AccountEvent>> {
        persist(AccountEvent::Deposited { amount }).then_reply(balance.amount + amount)
    }

    pub fn withdraw(&self, balance: &Balance, amount: u64) -> Effect<u64, Vec<AccountEvent>> {
        if amount > balance.amount {
            return Effect::error("insufficient funds");
        }
        persist(AccountEvent::Withdrawn { amount }).then_reply(balance.amount - amount)
    }

    pub fn balance(&self, balance: &Balance) -> Effect<u64, Vec<AccountEvent>> {
        Effect::reply(balance.amount)
    }
}

impl EventSourcedEntity for Account {
    const COMPONENT_ID: &'static str = "account";
    type State = Balance;
    type Event = AccountEvent;

    fn empty_state(&self) -> Balance {
        Balance::default()
    }

    fn apply_event(&self, balance: Balance, event: &AccountEvent) -> Balance {
        match event {
            AccountEvent::Deposited { amount } => Balance {
                amount: balance.amount + amount,
            },
            AccountEvent::Withdrawn { amount } => Balance {
                amount: balance.amount - amount,
            },
        }
    }

    fn describe(methods: &mut EntityMethods<Self, Balance, Vec<AccountEvent>>) {
        methods
            .command(Account::deposit)
            .command(Account::withdraw)
            .command(Account::balance);
    }
}

// Actions

pub struct CartSize {
    client: ComponentClient,
}

impl CartSize {
    pub fn items_in(&self, cart_id: String) -> Effect<u32> {
        match self
            .client
            .for_key_value_entity(cart_id)
            .method(ShoppingCart::get_cart)
        {
            Ok(get_cart) => Effect::async_reply(get_cart.invoke_async(()))
                .map_reply(|cart: Cart| cart.items.iter().map(|item| item.quantity).sum()),
            Err(err) => Effect::Error(err.into()),
        }
    }

    /// Asks a counter for a header of the call it receives from this action.
    pub fn relayed_header(&self, counter_id: String, key: String) -> Effect<Option<String>> {
        match self
            .client
            .for_key_value_entity(counter_id)
            .method(Counter::header)
        {
            Ok(header) => Effect::async_reply(header.invoke_async(key)),
            Err(err) => Effect::Error(err.into()),
        }
    }

    pub fn greet(&self, first: String, last: String) -> Effect<String> {
        Effect::reply(format!("Hello, {first} {last}!"))
    }
}

impl Action for CartSize {
    const COMPONENT_ID: &'static str = "cart-size";

    fn describe(methods: &mut ActionMethods<Self>) {
        methods
            .action(CartSize::items_in)
            .action(CartSize::relayed_header)
            .action(CartSize::greet);
    }
}

pub fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::builder();
    registry.register_key_value_entity(|_| Counter).unwrap();
    registry.register_key_value_entity(|_| ShoppingCart).unwrap();
    registry.register_key_value_entity(|_| UserEntity).unwrap();
    registry.register_view(|_| UsersByName).unwrap();
    registry.register_event_sourced_entity(|_| Account).unwrap();
    registry
        .register_action(|ctx| CartSize {
            client: ctx.component_client().clone(),
        })
        .unwrap();
    Arc::new(registry.build())
}

pub fn router() -> ComponentRouter {
    ComponentRouter::new(registry())
}

/// Records every call and answers with an error.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: AtomicUsize,
}

impl RecordingExecutor {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CallExecutor for RecordingExecutor {
    fn execute(&self, _call: ComponentCall) -> BoxFuture<'static, Result<Reply, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(Reply::error(ErrorReply::unavailable("recording only"))) }.boxed()
    }
}
