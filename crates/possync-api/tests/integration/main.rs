//! Integration tests for possync-api
//!
//! Uses wiremock to simulate the loyalty platform (token endpoint plus the
//! customer, membership and order resources) and verifies the client's
//! authentication, pagination and retry behavior end to end.

mod common;

mod test_auth;
mod test_customers;
mod test_orders;
