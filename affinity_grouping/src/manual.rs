/*!

This is the long-form manual for `affinity_grouping` and `affgroup`.

## Votes

During an election, each student gives a score to some of their classmates.
A score of `0` expresses no preference (or a wish to avoid someone), higher
scores express stronger preferences. Votes are directed: Alice may give `3`
to Bob while Bob gives nothing to Alice. There is at most one vote per voter
and candidate in an election; voting again replaces the previous score.

## Algorithm

A grouping run goes through the following steps:

1. **Affinity matrix.** The votes between participants are summed into a
   directed matrix. Votes from or for a student who does not participate,
   and votes for oneself, are ignored. Pairs where both students gave a
   nonzero score to each other are multiplied by the mutual boost
   (`1.5` by default). The matrix is then made symmetric by averaging the
   two directions: `A[i][j] = A[j][i] = (A[i][j] + A[j][i]) / 2`.

2. **Clustering.** The number of groups is `ceil(n / group_size)`. The
   rows of the matrix are clustered with k-means (k-means++ seeding), the
   diagonal being replaced by the largest affinity so that a student lands
   close to the classmates they like. The clustering is restarted with the
   seeds `base_seed`, `base_seed + 1`, ... and the restart with the highest
   *quality score* is kept (the first one in case of ties). The quality
   score is the sum, over all the groups and all the unordered pairs of
   members, of the symmetric affinity.

3. **Rebalancing.** k-means does not know about the maximum group size.
   While a group is too large, its member whose move costs the least
   (affinity to the current groupmates minus affinity to the receiving
   group) goes to the first group that still has room. This is a greedy
   heuristic: it guarantees the sizes, not the best possible affinity.
   The result has exactly `ceil(n / group_size)` non-empty groups.

4. **Persistence.** The previous groups of the election are deleted and
   the new ones are written. The in-memory store does it atomically. With
   other stores, a failure at this step leaves the election partially
   grouped, which is reported as a `Persistence` error whose stage tells
   what was touched.

5. **Naming.** Each group is named by the naming service from the
   initials of its members. If the service is not configured, fails,
   answers with an empty name or does not answer within the timeout, the
   name is the concatenated initials (`Unnamed Group` if no first name is
   known). Naming never makes a run fail.

   A call that times out is not cancelled: it finishes on its own thread
   and its answer is discarded. A namer should therefore bound its own
   calls. The `openai` namer of `affgroup` builds its HTTP client with the
   naming timeout, so each of these threads lives at most about twice the
   timeout.

6. **Scores.** Using the persisted group ids, the satisfaction of each
   student is the sum of the scores *they* gave to their groupmates. The
   total and the average per student are reported. A group is
   *highlighted* when at least one member gave a positive score to another
   member.

## Errors

| Error                      | Groups modified |
|----------------------------|-----------------|
| `InvalidInput`             | no              |
| `InsufficientParticipants` | no              |
| `ClusteringFailure`        | no              |
| `Persistence`              | depends on the stage (`ReadingVotes` is the only stage before writes) |
| `InconsistentGroups`       | yes             |

## Configuration

The election file read by `affgroup` is a JSON document:

```json
{
  "outputSettings": { "electionName": "Project teams", "electionId": 1 },
  "students": [
    { "id": 1, "firstName": "Alice" },
    { "id": 2, "firstName": "Bob" }
  ],
  "votes": [ { "voter": 1, "candidate": 2, "score": 3 } ],
  "voteFileSources": [ { "provider": "csv", "filePath": "votes.csv" } ],
  "rules": {
    "studentsPerGroup": 2,
    "restarts": 5,
    "randomSeed": "42",
    "mutualVoteBoost": "1.5",
    "namingTimeoutSeconds": 5,
    "naming": "initials"
  }
}
```

Only `outputSettings.electionName`, `students` and
`rules.studentsPerGroup` are mandatory.

- `mutualVoteBoost`: a number, or `none` to disable the boost.
- `naming`: `initials` (default) or `openai`. The `openai` namer reads
  the `OPENAI_API_KEY` and `OPENAI_MODEL` environment variables.

### Vote sources

- `csv`: a file with the header `voter,candidate,score`, relative to the
  election file.
- `synthetic`: every student spreads `totalPoints` (default 100) over all
  the other students at random, seeded with `randomSeed`. Allocations of
  zero points are not recorded. This is useful to try out an election
  before the real votes are in.

*/
