use std::time::Duration;

use rand::seq::IndexedRandom;

use super::{
    description::{
        server::{ServerDescription, ServerType},
        topology::{TopologyDescription, TopologyType},
    },
    public::ServerInfo,
};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

/// How often an idle primary writes a no-op to its oplog.
const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);

/// The smallest `maxStalenessSeconds` servers accept, whatever the heartbeat frequency.
const MIN_MAX_STALENESS: Duration = Duration::from_secs(90);

type Candidates<'a> = Vec<&'a ServerDescription>;

impl TopologyDescription {
    /// Picks a server for `criteria`: the suitable servers are narrowed to those within
    /// `local_threshold` of the fastest one, and one of those is chosen at random. `None` means
    /// no server qualifies right now.
    pub(crate) fn select_server(&self, criteria: &SelectionCriteria) -> Result<Option<ServerAddress>> {
        if let Some(message) = self.compatibility_error() {
            return Err(Error::incompatible_server(message.clone()));
        }

        let mut candidates = match criteria {
            SelectionCriteria::ReadPreference(read_pref) => self.candidates_for(read_pref)?,
            SelectionCriteria::Predicate(predicate) => self
                .servers()
                .filter(|server| {
                    server.is_available() && predicate(&ServerInfo::new_borrowed(server))
                })
                .collect(),
        };
        self.keep_within_latency_window(&mut candidates);

        Ok(candidates
            .choose(&mut rand::rng())
            .map(|server| server.address.clone()))
    }

    fn of_types<'a>(&'a self, types: &'a [ServerType]) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers()
            .filter(move |server| types.contains(&server.server_type))
    }

    fn candidates_for(&self, read_pref: &ReadPreference) -> Result<Candidates<'_>> {
        let candidates = match self.topology_type() {
            TopologyType::Unknown => Vec::new(),
            // A directly addressed server is used whatever the preference says.
            TopologyType::Single => self.servers().filter(|server| server.is_available()).collect(),
            TopologyType::Sharded => self.of_types(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.replica_set_candidates(read_pref)?
            }
        };
        Ok(candidates)
    }

    fn replica_set_candidates(&self, read_pref: &ReadPreference) -> Result<Candidates<'_>> {
        const PRIMARY: &[ServerType] = &[ServerType::RsPrimary];
        const SECONDARY: &[ServerType] = &[ServerType::RsSecondary];
        const EITHER: &[ServerType] = &[ServerType::RsPrimary, ServerType::RsSecondary];

        let eligible = |types| self.eligible(types, read_pref);
        let primary = || self.of_types(PRIMARY).collect::<Candidates<'_>>();

        Ok(match read_pref {
            ReadPreference::Primary => primary(),
            ReadPreference::Secondary { .. } => eligible(SECONDARY)?,
            ReadPreference::Nearest { .. } => eligible(EITHER)?,
            ReadPreference::PrimaryPreferred { .. } => match primary() {
                found if !found.is_empty() => found,
                _ => eligible(SECONDARY)?,
            },
            ReadPreference::SecondaryPreferred { .. } => match eligible(SECONDARY)? {
                found if !found.is_empty() => found,
                _ => primary(),
            },
        })
    }

    /// The servers of `types` that satisfy the staleness bound and tag sets of `read_pref`.
    fn eligible<'a>(
        &'a self,
        types: &'a [ServerType],
        read_pref: &ReadPreference,
    ) -> Result<Candidates<'a>> {
        let mut candidates: Candidates<'a> = self.of_types(types).collect();

        if let Some(max_staleness) = read_pref.max_staleness().filter(|d| !d.is_zero()) {
            let minimum = MIN_MAX_STALENESS.max(self.heartbeat_freq.saturating_add(IDLE_WRITE_PERIOD));
            if max_staleness < minimum {
                return Err(Error::invalid_argument(format!(
                    "maxStalenessSeconds is {} but must be at least {}",
                    max_staleness.as_secs(),
                    minimum.as_secs()
                )));
            }
            self.drop_stale(&mut candidates, max_staleness);
        }

        if let Some(tag_sets) = read_pref.tag_sets() {
            keep_first_matching_tag_set(&mut candidates, tag_sets);
        }
        Ok(candidates)
    }

    /// Removes the secondaries estimated to lag further than `max_staleness` behind. With a
    /// primary, lag is measured against it. Without one, against the freshest secondary.
    fn drop_stale(&self, candidates: &mut Candidates<'_>, max_staleness: Duration) {
        let limit = millis(max_staleness);
        let heartbeat = millis(self.heartbeat_freq);

        let staleness: Box<dyn Fn(&ServerDescription) -> Option<i64>> = match self.primary() {
            Some(primary) => {
                let Some(primary_lag) = write_lag(primary) else {
                    return;
                };
                Box::new(move |server: &ServerDescription| {
                    Some(write_lag(server)? - primary_lag + heartbeat)
                })
            }
            None => {
                let freshest = self
                    .of_types(&[ServerType::RsSecondary])
                    .filter_map(last_write_millis)
                    .max();
                let Some(freshest) = freshest else {
                    return;
                };
                Box::new(move |server: &ServerDescription| {
                    Some(freshest - last_write_millis(server)? + heartbeat)
                })
            }
        };

        candidates.retain(|server| {
            server.server_type == ServerType::RsPrimary
                || staleness(server).is_some_and(|estimate| estimate <= limit)
        });
    }

    fn keep_within_latency_window(&self, candidates: &mut Candidates<'_>) {
        let Some(fastest) = candidates
            .iter()
            .filter_map(|server| server.average_round_trip_time)
            .min()
        else {
            return;
        };
        let cutoff = fastest.saturating_add(self.local_threshold);
        candidates.retain(|server| {
            server
                .average_round_trip_time
                .is_some_and(|rtt| rtt <= cutoff)
        });
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn last_write_millis(server: &ServerDescription) -> Option<i64> {
    server
        .last_write_date()
        .ok()
        .flatten()
        .map(|date| date.timestamp_millis())
}

/// How long before its last check the server last wrote.
fn write_lag(server: &ServerDescription) -> Option<i64> {
    Some(server.last_update_time?.timestamp_millis() - last_write_millis(server)?)
}

/// Tag sets are tried in order; the first that some candidate matches decides. If none match,
/// nothing is eligible. No tag sets at all means no filtering.
fn keep_first_matching_tag_set(candidates: &mut Candidates<'_>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }
    match tag_sets
        .iter()
        .find(|tag_set| candidates.iter().any(|server| server.matches_tag_set(tag_set)))
    {
        Some(tag_set) => candidates.retain(|server| server.matches_tag_set(tag_set)),
        None => candidates.clear(),
    }
}
