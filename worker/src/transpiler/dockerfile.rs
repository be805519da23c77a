use super::github;
use bugswarm_common::model::Side;
use bugswarm_common::CiService;

/// Files of a job's build context.
pub const DOCKERFILE: &str = "Dockerfile";
pub const REPO_TAR: &str = "repo.tar";
pub const SCRIPT: &str = "build.sh";

fn render(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Setup every GitHub job image starts with.
///
/// Jobs with their own `container:` don't have our runner tooling, so it's
/// installed and the tool cache of the matching runner image is copied over.
fn github_base(image: &str, runs_on: &str, custom_container: bool) -> Vec<String> {
    let mut lines = vec![format!("FROM {}", image)];

    if custom_container {
        if let Some(runner) = github::runner_image(runs_on) {
            lines.push(format!("COPY --from={} /opt/hostedtoolcache /opt/hostedtoolcache", runner));
        }
        lines.extend([
            "RUN apt-get update && apt-get -y install sudo curl coreutils python3 vim".to_string(),
            "RUN apt-get install -y python-is-python3 || sudo ln -s /usr/bin/python3 /usr/bin/python".to_string(),
            "RUN curl -fsSL https://deb.nodesource.com/setup_16.x | bash -".to_string(),
            "RUN apt-get install -y nodejs".to_string(),
        ]);
    }

    lines.extend([
        "RUN sudo rm -rf /var/lib/apt/lists/*".to_string(),
        "RUN sudo rm -rf /etc/apt/sources.list.d/*".to_string(),
        "RUN sudo apt-get clean".to_string(),
        // deprecated TLS versions break dependency downloads
        "RUN sudo apt-get update && sudo apt-get -y install --only-upgrade openssl libssl-dev vim".to_string(),
        "RUN echo \"TERM=dumb\" >> /etc/environment".to_string(),
        "RUN touch /etc/reproducer-environment && chmod 777 /etc/reproducer-environment".to_string(),
        "RUN useradd -ms /bin/bash github".to_string(),
        "RUN echo \"ALL ALL=(ALL:ALL) NOPASSWD: ALL\" >> /etc/sudoers".to_string(),
    ]);
    lines
}

/// Actions, step scripts and event payload of a job, `from` is relative to the build context.
fn github_job_files(job_id: u64, from: &str) -> Vec<String> {
    vec![
        format!("ADD --chown=github:github {}actions /home/github/{}/actions", from, job_id),
        format!("ADD --chown=github:github {}steps /home/github/{}/steps", from, job_id),
        format!("ADD --chown=github:github {}event.json /home/github/{}/event.json", from, job_id),
        format!("RUN chmod -R 777 /home/github/{}", job_id),
    ]
}

fn entrypoint(lines: &mut Vec<String>, user: &str) {
    lines.extend([
        format!("USER {}", user),
        "ENTRYPOINT [\"/bin/bash\", \"-c\"]".to_string(),
    ]);
}

/// Dockerfile layering a GitHub Actions job on top of its runner image.
pub fn github(job_id: u64, image: &str, runs_on: &str, custom_container: bool) -> String {
    let mut lines = github_base(image, runs_on, custom_container);
    lines.extend([
        format!("ADD {} /home/github/build/", REPO_TAR),
        format!("ADD --chown=github:github {} /usr/local/bin/run.sh", SCRIPT),
        "RUN chmod 777 /usr/local/bin/run.sh".to_string(),
    ]);
    lines.extend(github_job_files(job_id, ""));
    lines.push("RUN rm -rf /home/linuxbrew && chown -R github:github /home".to_string());
    entrypoint(&mut lines, "github");
    lines.push("CMD [\"/usr/local/bin/run.sh\"]".to_string());
    render(lines)
}

/// Dockerfile layering a Travis job on top of the image it originally ran in.
pub fn travis(image: &str) -> String {
    let mut lines = vec![
        format!("FROM {}", image),
        "RUN echo \"TERM=dumb\" >> /etc/environment".to_string(),
        format!("ADD {} /home/travis/build/", REPO_TAR),
        format!("ADD --chown=travis:travis {} /usr/local/bin/run.sh", SCRIPT),
        "RUN chmod 777 /usr/local/bin/run.sh".to_string(),
        "RUN chown -R travis:travis /home/travis/build".to_string(),
    ];
    entrypoint(&mut lines, "travis");
    lines.push("CMD [\"/usr/local/bin/run.sh\"]".to_string());
    render(lines)
}

/// Both jobs of a pair in one image.
///
/// The checkouts live in `build/failed/<repo>` and `build/passed/<repo>`, the
/// build scripts are `run_failed.sh` and `run_passed.sh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairImage<'a> {
    pub ci: CiService,
    pub image: &'a str,
    pub runs_on: Option<&'a str>,
    pub custom_container: bool,
    pub failed_job_id: u64,
    pub passed_job_id: u64,
}

impl PairImage<'_> {
    pub fn job_id(&self, side: Side) -> u64 {
        match side {
            Side::Failed => self.failed_job_id,
            Side::Passed => self.passed_job_id,
        }
    }

    pub fn dockerfile(&self) -> String {
        let user = super::user(self.ci);
        let build_root = super::build_root(self.ci);

        let mut lines = match self.ci {
            CiService::Github => github_base(self.image, self.runs_on.unwrap_or_default(), self.custom_container),
            CiService::Travis => vec![
                format!("FROM {}", self.image),
                "RUN sudo rm -rf /var/lib/apt/lists/*".to_string(),
                "RUN sudo rm -rf /etc/apt/sources.list.d/*".to_string(),
                "RUN sudo apt-get clean".to_string(),
                "RUN sudo apt-get update && sudo apt-get install --only-upgrade openssl libssl-dev".to_string(),
                "RUN echo \"TERM=dumb\" >> /etc/environment".to_string(),
            ],
        };

        for side in Side::BOTH {
            let job_id = self.job_id(side);
            lines.extend([
                format!("ADD {} {}/{}/", pair_tar(side), build_root, side),
                format!("ADD {}-orig.log {}/", job_id, build_root),
                format!("ADD --chown={}:{} {} /usr/local/bin/{}", user, user, pair_script(side), pair_script(side)),
                format!("RUN chmod 777 /usr/local/bin/{}", pair_script(side)),
            ]);
            if self.ci == CiService::Github {
                lines.extend(github_job_files(job_id, &format!("{}/", side)));
            }
        }

        lines.push(format!("RUN chmod 777 -R {} && chown -R {}:{} {}", build_root, user, user, build_root));
        entrypoint(&mut lines, user);
        render(lines)
    }
}

/// Checkout of one side inside a pair build context.
pub fn pair_tar(side: Side) -> String {
    format!("{}.tar", side)
}

pub fn pair_script(side: Side) -> String {
    format!("run_{}.sh", side)
}
