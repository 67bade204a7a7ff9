mod capabilities;
pub(crate) mod description;
mod monitor;
pub mod public;
mod server;
mod server_selection;
#[cfg(test)]
mod test;

pub use self::{
    capabilities::Capabilities,
    description::{server::ServerType, topology::TopologyType},
    public::ServerInfo,
};
pub(crate) use self::{
    description::{
        server::ServerDescription,
        topology::TopologyDescription,
    },
    monitor::Monitor,
    server::Server,
};
