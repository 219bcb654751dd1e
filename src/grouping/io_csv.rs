// Reading votes from CSV files.

use std::io::Read;

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;

use crate::grouping::*;

// One line of a vote file, with the header `voter,candidate,score`.
#[derive(Debug, Deserialize)]
struct VoteRow {
    voter: u64,
    candidate: u64,
    score: u32,
}

pub fn read_csv_votes(path: &str) -> ElectionResult<Vec<Vote>> {
    info!("read_csv_votes: reading {:?}", path);
    let rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    parse_votes(rdr)
}

fn parse_votes<R: Read>(mut rdr: csv::Reader<R>) -> ElectionResult<Vec<Vote>> {
    let mut res: Vec<Vote> = Vec::new();
    for (idx, row_r) in rdr.deserialize::<VoteRow>().enumerate() {
        // The header is the first line.
        let lineno = idx + 2;
        let row = row_r.context(CsvLineParseSnafu { lineno })?;
        debug!("parse_votes: lineno: {:?} row: {:?}", lineno, row);
        res.push(Vote {
            voter: StudentId(row.voter),
            candidate: StudentId(row.candidate),
            score: row.score,
        });
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> ElectionResult<Vec<Vote>> {
        let rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .from_reader(content.as_bytes());
        parse_votes(rdr)
    }

    #[test]
    fn reads_votes() {
        let votes = parse_str("voter,candidate,score\n1,2,5\n 2 , 1 , 3 \n").unwrap();
        assert_eq!(
            votes,
            vec![
                Vote {
                    voter: StudentId(1),
                    candidate: StudentId(2),
                    score: 5
                },
                Vote {
                    voter: StudentId(2),
                    candidate: StudentId(1),
                    score: 3
                },
            ]
        );
    }

    #[test]
    fn columns_follow_the_header() {
        let votes = parse_str("score,voter,candidate\n4,7,8\n").unwrap();
        assert_eq!(votes[0].voter, StudentId(7));
        assert_eq!(votes[0].candidate, StudentId(8));
        assert_eq!(votes[0].score, 4);
    }

    #[test]
    fn reports_the_bad_line() {
        let res = parse_str("voter,candidate,score\n1,2,5\n1,3,-1\n");
        assert!(matches!(
            res,
            Err(ElectionError::CsvLineParse { lineno: 3, .. })
        ));
    }

    #[test]
    fn header_only() {
        assert!(parse_str("voter,candidate,score\n").unwrap().is_empty());
    }
}
