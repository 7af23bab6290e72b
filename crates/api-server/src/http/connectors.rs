mod callback;
mod disconnect;
mod helpers;
mod start;
mod status;

pub(super) use callback::complete_quickbooks_connect;
pub(super) use disconnect::disconnect_quickbooks;
pub(super) use start::start_quickbooks_connect;
pub(super) use status::quickbooks_status;
