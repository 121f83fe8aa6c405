mod model;
mod store;

pub use model::{
    Account, AccountId, AccountSummary, AccountUpdate, NewAccount, Password, format_login,
    parse_server_port,
};
pub use store::AccountStore;
