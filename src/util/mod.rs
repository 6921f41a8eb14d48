pub mod api_util;
pub mod catalog;
pub mod cipher_util;
pub mod economy;
