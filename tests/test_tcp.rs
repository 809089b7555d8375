use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use pull_map::api::group_dto::{GroupConfig, GroupDto};
use pull_map::domain::collective::gather;
use pull_map::domain::communication::protocol::{Source, Tag, TagFilter};
use pull_map::domain::communication::session::TcpComm;
use pull_map::error::Result;
use pull_map::{AddressingMode, Communicator, Error, MapOptions, Rank, join_group, map_unordered};

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn config(rank: usize, size: usize, addr: &str) -> GroupConfig {
    GroupConfig { rank, size, coordinator_addr: addr.to_string(), connect_timeout_ms: 10_000, retry_interval_ms: 20 }
}

/// Runs `body` on `size` threads, each owning one TCP member of a fresh group.
fn run_tcp_group<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(TcpComm) -> T + Sync,
{
    let addr = free_addr();
    let body = &body;
    let addr = &addr;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..size)
            .map(|rank| scope.spawn(move || body(TcpComm::connect(&config(rank, size, addr)).unwrap())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_squares_over_tcp() {
    let data = [10u64, 20, 30, 40];

    let outcomes = run_tcp_group(3, |comm| -> Result<(Rank, Vec<u64>)> {
        let rank = comm.rank();
        let map = map_unordered(comm, &data, |x| x * x, MapOptions::default())?;
        Ok((rank, map.collect::<Result<Vec<u64>>>()?))
    });

    for outcome in outcomes {
        let (rank, mut values) = outcome.unwrap();
        values.sort();
        if rank == Rank(0) {
            assert_eq!(values, vec![100, 400, 900, 1600]);
        } else {
            assert!(values.is_empty());
        }
    }
}

#[test]
fn test_scanning_map_over_tcp() {
    let words: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"].iter().map(|w| w.to_string()).collect();

    let outcomes = run_tcp_group(4, |comm| -> Result<(bool, usize)> {
        let options = MapOptions::default().with_addressing(AddressingMode::Scanning);
        let mut map = map_unordered(comm, &words, |w| w.to_uppercase(), options)?;
        let mut values = (&mut map).collect::<Result<Vec<String>>>()?;
        if map.context().is_coordinator() {
            values.sort();
            assert_eq!(values, vec!["ALPHA", "BETA", "DELTA", "EPSILON", "GAMMA", "ZETA"]);
        }
        Ok((map.context().is_coordinator(), map.processed()))
    });

    let mut computed_by_workers = 0;
    for outcome in outcomes {
        let (is_coordinator, processed) = outcome.unwrap();
        if is_coordinator {
            assert_eq!(processed, 6, "the coordinator received every result");
        } else {
            computed_by_workers += processed;
        }
    }
    assert_eq!(computed_by_workers, 6, "workers computed every item once");
}

#[test]
fn test_gather_over_tcp() {
    let outcomes = run_tcp_group(3, |mut comm| -> Result<Option<Vec<String>>> {
        let rank = comm.rank();
        gather(&mut comm, format!("rank-{}", rank), Rank(0))
    });

    let mut outcomes = outcomes.into_iter().map(|o| o.unwrap());
    assert_eq!(outcomes.next().unwrap(), Some(vec!["rank-0".to_string(), "rank-1".to_string(), "rank-2".to_string()]));
    assert!(outcomes.all(|o| o.is_none()));
}

#[test]
fn test_workers_only_reach_the_coordinator() {
    let outcomes = run_tcp_group(3, |mut comm| -> Result<()> {
        if comm.rank() == Rank(1) {
            let err = comm.send(Rank(2), Tag::Gather, vec![]).unwrap_err();
            assert!(matches!(err, Error::Unroutable { from: Rank(1), to: Rank(2) }));
        }
        comm.barrier()
    });

    for outcome in outcomes {
        outcome.unwrap();
    }
}

#[test]
fn test_coordinator_abort_releases_workers() {
    let data: Vec<u64> = (0..200).collect();

    let outcomes = run_tcp_group(3, |mut comm| -> Result<()> {
        match comm.rank().index() {
            0 => {
                let map = map_unordered(comm, &data, |x| *x, MapOptions::default())?;
                let err = map.collect::<Result<Vec<u64>>>().unwrap_err();
                assert!(matches!(err, Error::ProtocolError { tag: 9, sender: Rank(1) }));
                // Dropping the map closes every connection of rank 0.
                Ok(())
            }
            1 => {
                comm.barrier()?;
                comm.send(Rank(0), Tag::Gather, vec![])?;
                let err = comm.recv(Source::Rank(Rank(0)), TagFilter::Any).unwrap_err();
                assert!(matches!(err, Error::Disconnected(Rank(0))));
                Ok(())
            }
            _ => {
                let mut map = map_unordered(
                    comm,
                    &data,
                    |x| {
                        thread::sleep(Duration::from_millis(10));
                        *x
                    },
                    MapOptions::default(),
                )?;
                let err = map.next().unwrap().unwrap_err();
                assert!(matches!(err, Error::Disconnected(Rank(0))), "unexpected error: {}", err);
                assert!(map.next().is_none());
                Ok(())
            }
        }
    });

    for outcome in outcomes {
        outcome.unwrap();
    }
}

#[test]
fn test_single_member_needs_no_network() {
    let overrides = GroupDto { rank: Some(0), size: Some(1), ..Default::default() };
    let comm = join_group(overrides, None).unwrap();

    let data = ['x', 'y'];
    let values: Vec<char> = map_unordered(comm, &data, |c| c.to_ascii_uppercase(), MapOptions::default())
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(values, vec!['X', 'Y']);
}
