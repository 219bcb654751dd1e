use clap::Parser;

/// Forms student groups out of the affinity votes of a class election.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The election file, in JSON format. It lists the students, the votes or the
    /// files containing the votes, and the grouping rules. See the manual for the format.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path) A reference file containing the expected summary of the grouping in JSON
    /// format. If provided, affgroup will check that the generated groups match the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the grouping will be written
    /// in JSON format to the given location. By default, it is printed on the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path or empty) A CSV file with the header `voter,candidate,score`. If provided, the
    /// votes are read from it in addition to the ones declared in the election file.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (integer) Overrides the number of students per group of the election file.
    #[clap(long, value_parser)]
    pub group_size: Option<usize>,

    /// ('initials' or 'openai') Overrides how the groups get their names.
    #[clap(long, value_parser)]
    pub naming: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
